//! Error types for the stagerun core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering configuration, the compute engine, and the experiment orchestrator.

use crate::workflow::types::PhaseKind;
use std::fmt;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from run options, configuration files, and pipeline definitions.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Conflicting run options: {options} are mutually exclusive")]
    ConflictingRunModes { options: String },

    #[error("Unknown resume point '{name}' (expected one of: {expected})")]
    UnknownResumePoint { name: String, expected: String },

    #[error("Unknown phase '{name}'")]
    UnknownPhase { name: String },

    #[error("Invalid pipeline: {message}")]
    InvalidPipeline { message: String },

    #[error("Pipeline parse error: {message}")]
    PipelineParse { message: String },
}

/// Errors reported by a compute engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Checkpoint not found: {label}")]
    CheckpointNotFound { label: String },

    #[error("Unknown parameter '{name}' at '{path}'")]
    UnknownParameter { path: String, name: String },

    #[error("Engine has not been built or loaded")]
    NotBuilt,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Engine failure: {message}")]
    Failed { message: String },
}

/// Which callback list a failing callback belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Setup,
    Iteration,
    Finish,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Setup => write!(f, "setup"),
            HookKind::Iteration => write!(f, "iteration"),
            HookKind::Finish => write!(f, "finish"),
        }
    }
}

/// Top-level error type for running an experiment.
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("loading network failed, check available checkpoints ('{label}'): {source}")]
    CheckpointLoad {
        label: String,
        #[source]
        source: EngineError,
    },

    #[error("saving checkpoint '{label}' failed: {source}")]
    CheckpointSave {
        label: String,
        #[source]
        source: EngineError,
    },

    #[error("building network failed: {0}")]
    Build(#[source] EngineError),

    #[error("ran out of data at iteration {iteration} of {budget} (phase '{phase}', step '{step}')")]
    DataExhausted {
        phase: PhaseKind,
        step: String,
        iteration: u64,
        budget: u64,
    },

    #[error(
        "{hook} callback '{callback}' failed in phase '{phase}', step '{step}'{}: {source}",
        at_iteration(.iteration)
    )]
    Callback {
        callback: String,
        hook: HookKind,
        phase: PhaseKind,
        step: String,
        iteration: Option<u64>,
        #[source]
        source: BoxError,
    },

    #[error("engine failed in phase '{phase}', step '{step}': {source}")]
    Engine {
        phase: PhaseKind,
        step: String,
        #[source]
        source: EngineError,
    },

    #[error("experiment was aborted by an earlier error and cannot continue")]
    Aborted,
}

fn at_iteration(iteration: &Option<u64>) -> String {
    iteration
        .map(|i| format!(" at iteration {i}"))
        .unwrap_or_default()
}

/// A type alias for results using the top-level `ExperimentError`.
pub type Result<T> = std::result::Result<T, ExperimentError>;

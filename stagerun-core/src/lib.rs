//! # stagerun core
//!
//! Core library for stagerun, a resumable orchestrator for multi-stage
//! training experiments. Provides the phase/step/iteration workflow model,
//! run-mode selection, the pausable executor, the compute engine contract
//! with a checkpoint store, the YAML pipeline DSL, and configuration.

pub mod config;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod workflow;

// Re-export commonly used types at the crate root.
pub use config::{ExperimentConfig, load_config};
pub use engine::{CheckpointStore, ComputeEngine, IterationOutcome, ReplayEngine};
pub use error::{ConfigError, EngineError, ExperimentError, HookKind, Result};
pub use workflow::{
    Callback, CheckpointName, Experiment, ExperimentContext, ExperimentOptions, ExperimentResults,
    IterationBudget, PhaseKind, Pipeline, Position, RunMode, RunOptions, RunStatus, Step,
};

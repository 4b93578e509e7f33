//! Run-mode selection: turns user run options into the phase range to execute
//! and the checkpoint to start from.
//!
//! Everything here is pure. No engine is touched until the orchestrator is
//! constructed from the resulting plan.

use crate::error::ConfigError;
use crate::workflow::types::{CheckpointName, PhaseKind};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Default per-step iteration cap applied in test mode.
pub const DEFAULT_TEST_MODE_ITERATIONS: u64 = 10;

/// Raw run options as they arrive from configuration files or CLI flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Checkpoint label to resume from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_from: Option<String>,
    /// Build the engine and checkpoint it, run nothing.
    pub create_only: bool,
    /// Skip straight to inference from the fully-trained checkpoint.
    pub infer_only: bool,
    /// Save a checkpoint whenever a phase completes.
    pub checkpoint: bool,
    /// Cap every step's iteration budget for fast smoke tests.
    pub test_mode: bool,
}

/// Validated, mutually exclusive run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Default,
    ResumeFrom(CheckpointName),
    CreateOnly,
    InferOnly,
}

impl RunMode {
    /// Validate the mutually exclusive options and build the run mode.
    pub fn from_options(options: &RunOptions) -> Result<Self, ConfigError> {
        let mut set = Vec::new();
        if options.resume_from.is_some() {
            set.push("resume_from");
        }
        if options.create_only {
            set.push("create_only");
        }
        if options.infer_only {
            set.push("infer_only");
        }
        if set.len() > 1 {
            return Err(ConfigError::ConflictingRunModes {
                options: set.join(", "),
            });
        }

        if let Some(label) = &options.resume_from {
            return Ok(RunMode::ResumeFrom(label.parse()?));
        }
        if options.create_only {
            return Ok(RunMode::CreateOnly);
        }
        if options.infer_only {
            return Ok(RunMode::InferOnly);
        }
        Ok(RunMode::Default)
    }
}

/// The phase subrange to run and the checkpoint to load first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPlan {
    /// Half-open range of indices into [`PhaseKind::ALL`].
    pub phases: Range<usize>,
    /// `None` means the engine is built from scratch.
    pub checkpoint: Option<CheckpointName>,
}

impl WorkflowPlan {
    pub fn for_mode(mode: RunMode) -> Self {
        let end = PhaseKind::ALL.len();
        match mode {
            RunMode::Default => Self {
                phases: 0..end,
                checkpoint: None,
            },
            RunMode::ResumeFrom(checkpoint) => Self {
                phases: checkpoint.produced_by().index() + 1..end,
                checkpoint: Some(checkpoint),
            },
            RunMode::CreateOnly => Self {
                phases: PhaseKind::Build.index()..PhaseKind::Build.index() + 1,
                checkpoint: None,
            },
            RunMode::InferOnly => Self {
                phases: PhaseKind::Infer.index()..end,
                checkpoint: Some(CheckpointName::FullyTrained),
            },
        }
    }

    pub fn phase_kinds(&self) -> impl Iterator<Item = PhaseKind> + '_ {
        PhaseKind::ALL[self.phases.clone()].iter().copied()
    }
}

/// Validated options consumed once by the orchestrator at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentOptions {
    pub mode: RunMode,
    pub checkpoint_enabled: bool,
    /// Per-step iteration cap, set only in test mode.
    pub iteration_cap: Option<u64>,
}

impl Default for ExperimentOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Default,
            checkpoint_enabled: false,
            iteration_cap: None,
        }
    }
}

impl ExperimentOptions {
    pub fn from_run_options(options: &RunOptions, test_mode_iterations: u64) -> Result<Self, ConfigError> {
        Ok(Self {
            mode: RunMode::from_options(options)?,
            checkpoint_enabled: options.checkpoint,
            iteration_cap: options.test_mode.then_some(test_mode_iterations),
        })
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_checkpointing(mut self, enabled: bool) -> Self {
        self.checkpoint_enabled = enabled;
        self
    }

    pub fn with_test_mode(mut self, iterations: u64) -> Self {
        self.iteration_cap = Some(iterations);
        self
    }

    pub fn plan(&self) -> WorkflowPlan {
        WorkflowPlan::for_mode(self.mode)
    }
}

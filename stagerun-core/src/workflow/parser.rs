//! YAML DSL parser and validator for pipeline definitions.

use crate::error::ConfigError;
use crate::workflow::builtins::{
    DEFAULT_PIPELINE, LogMessage, PauseAfter, PauseEvery, PauseOnce, RecordParameter, SetParameter,
};
use crate::workflow::callback::Callback;
use crate::workflow::pipeline::Pipeline;
use crate::workflow::types::{IterationBudget, PhaseKind, Step};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A pipeline definition parsed from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub phases: Vec<PhaseDefinition>,
}

/// Steps declared for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub phase: PhaseKind,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// A single declared step. A missing `iterations` means "until exhausted".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default)]
    pub iterations: Option<u64>,
    #[serde(default)]
    pub setup: Vec<HookSpec>,
    #[serde(default)]
    pub iter: Vec<HookSpec>,
    #[serde(default)]
    pub finish: Vec<HookSpec>,
}

/// A built-in hook reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "snake_case")]
pub enum HookSpec {
    SetParameter {
        path: String,
        name: String,
        value: serde_json::Value,
    },
    RecordParameter {
        path: String,
        name: String,
        key: String,
    },
    Log {
        message: String,
    },
    PauseOnce,
    PauseAfter {
        iterations: u64,
    },
    PauseEvery {
        interval: u64,
    },
}

impl HookSpec {
    fn kind(&self) -> &'static str {
        match self {
            HookSpec::SetParameter { .. } => "set_parameter",
            HookSpec::RecordParameter { .. } => "record_parameter",
            HookSpec::Log { .. } => "log",
            HookSpec::PauseOnce => "pause_once",
            HookSpec::PauseAfter { .. } => "pause_after",
            HookSpec::PauseEvery { .. } => "pause_every",
        }
    }

    fn iteration_only(&self) -> bool {
        matches!(self, HookSpec::PauseAfter { .. } | HookSpec::PauseEvery { .. })
    }

    pub fn into_callback(self) -> Callback {
        match self {
            HookSpec::SetParameter { path, name, value } => {
                Callback::hook(SetParameter::new(path, name, value))
            }
            HookSpec::RecordParameter { path, name, key } => {
                Callback::hook(RecordParameter::new(path, name, key))
            }
            HookSpec::Log { message } => Callback::hook(LogMessage::new(message)),
            HookSpec::PauseOnce => Callback::hook(PauseOnce::new()),
            HookSpec::PauseAfter { iterations } => Callback::hook(PauseAfter::new(iterations)),
            HookSpec::PauseEvery { interval } => Callback::hook(PauseEvery::new(interval)),
        }
    }
}

impl StepDefinition {
    fn budget(&self) -> IterationBudget {
        match self.iterations {
            Some(count) => IterationBudget::fixed(count),
            None => IterationBudget::until_exhausted(),
        }
    }
}

impl PipelineDefinition {
    /// Build the runtime pipeline. Call [`validate_pipeline`] first.
    pub fn into_pipeline(self) -> Pipeline {
        self.phases.into_iter().fold(Pipeline::new(), |pipeline, phase| {
            let steps = phase
                .steps
                .into_iter()
                .map(|def| {
                    let budget = def.budget();
                    let mut step = Step::new(def.name, budget);
                    step.setup = def.setup.into_iter().map(HookSpec::into_callback).collect();
                    step.iter = def.iter.into_iter().map(HookSpec::into_callback).collect();
                    step.finish = def.finish.into_iter().map(HookSpec::into_callback).collect();
                    step
                })
                .collect();
            pipeline.phase(phase.phase, steps)
        })
    }
}

/// Parse a pipeline definition from a YAML string.
pub fn parse_pipeline(yaml: &str) -> Result<PipelineDefinition, ConfigError> {
    serde_yaml::from_str::<PipelineDefinition>(yaml).map_err(|e| ConfigError::PipelineParse {
        message: e.to_string(),
    })
}

/// Read, parse and validate a pipeline definition file.
pub fn load_pipeline(path: &Path) -> Result<PipelineDefinition, ConfigError> {
    let yaml = std::fs::read_to_string(path).map_err(|e| ConfigError::PipelineParse {
        message: format!("{}: {e}", path.display()),
    })?;
    let def = parse_pipeline(&yaml)?;
    validate_pipeline(&def)?;
    Ok(def)
}

/// The built-in pipeline definition.
pub fn default_pipeline() -> Result<PipelineDefinition, ConfigError> {
    parse_pipeline(DEFAULT_PIPELINE)
}

/// Validate a parsed pipeline definition for structural correctness.
///
/// Checks:
/// - No phase is declared twice
/// - Step names are non-empty and unique within their phase
/// - Iteration-only hooks appear only in `iter` lists
/// - `pause_every` intervals are positive
pub fn validate_pipeline(def: &PipelineDefinition) -> Result<(), ConfigError> {
    let mut seen_phases = HashSet::new();
    for phase in &def.phases {
        if !seen_phases.insert(phase.phase) {
            return Err(invalid(format!("Duplicate phase: '{}'", phase.phase)));
        }

        let mut seen_steps = HashSet::new();
        for step in &phase.steps {
            if step.name.trim().is_empty() {
                return Err(invalid(format!(
                    "Phase '{}' has a step with an empty name",
                    phase.phase
                )));
            }
            if !seen_steps.insert(step.name.as_str()) {
                return Err(invalid(format!(
                    "Duplicate step '{}' in phase '{}'",
                    step.name, phase.phase
                )));
            }

            for (list, hooks) in [("setup", &step.setup), ("finish", &step.finish)] {
                if let Some(hook) = hooks.iter().find(|h| h.iteration_only()) {
                    return Err(invalid(format!(
                        "Hook '{}' is only valid in iter lists (phase '{}', step '{}', list '{list}')",
                        hook.kind(),
                        phase.phase,
                        step.name
                    )));
                }
            }

            let zero_interval = [&step.setup, &step.iter, &step.finish]
                .into_iter()
                .flatten()
                .any(|h| matches!(h, HookSpec::PauseEvery { interval: 0 }));
            if zero_interval {
                return Err(invalid(format!(
                    "Step '{}' in phase '{}' uses pause_every with interval 0",
                    step.name, phase.phase
                )));
            }
        }
    }
    Ok(())
}

fn invalid(message: String) -> ConfigError {
    ConfigError::InvalidPipeline { message }
}

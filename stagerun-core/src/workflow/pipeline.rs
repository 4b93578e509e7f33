//! Runtime pipeline: the steps attached to each canonical phase, before the
//! run mode selects which phases execute.

use crate::error::ConfigError;
use crate::workflow::callback::Callback;
use crate::workflow::types::{Phase, PhaseKind, Step};
use std::collections::{BTreeMap, HashSet};

/// Steps for each phase of the canonical sequence.
#[derive(Debug, Default)]
pub struct Pipeline {
    phases: BTreeMap<PhaseKind, Vec<Step>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step to `kind`.
    pub fn step(mut self, kind: PhaseKind, step: Step) -> Self {
        self.phases.entry(kind).or_default().push(step);
        self
    }

    /// Replace all steps of `kind`.
    pub fn phase(mut self, kind: PhaseKind, steps: Vec<Step>) -> Self {
        self.phases.insert(kind, steps);
        self
    }

    /// Append a callback built by `make` to the iteration list of every step.
    pub fn with_iteration_hook(mut self, mut make: impl FnMut() -> Callback) -> Self {
        for step in self.phases.values_mut().flatten() {
            step.iter.push(make());
        }
        self
    }

    pub fn steps(&self, kind: PhaseKind) -> &[Step] {
        self.phases.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check callback placement and step naming.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, steps) in &self.phases {
            let mut seen = HashSet::new();
            for step in steps {
                if step.name.trim().is_empty() {
                    return Err(ConfigError::InvalidPipeline {
                        message: format!("Phase '{kind}' has a step with an empty name"),
                    });
                }
                if !seen.insert(step.name.as_str()) {
                    return Err(ConfigError::InvalidPipeline {
                        message: format!("Duplicate step '{}' in phase '{kind}'", step.name),
                    });
                }
                check_placement(*kind, step, "setup", &step.setup)?;
                check_placement(*kind, step, "finish", &step.finish)?;
            }
        }
        Ok(())
    }

    /// Take the phases in `kinds`, in order. Phases without steps come back empty.
    pub(crate) fn take_phases(mut self, kinds: impl Iterator<Item = PhaseKind>) -> Vec<Phase> {
        kinds
            .map(|kind| Phase::new(kind, self.phases.remove(&kind).unwrap_or_default()))
            .collect()
    }
}

fn check_placement(kind: PhaseKind, step: &Step, list: &str, callbacks: &[Callback]) -> Result<(), ConfigError> {
    match callbacks.iter().find(|c| c.requires_iteration()) {
        Some(cb) => Err(ConfigError::InvalidPipeline {
            message: format!(
                "Iteration callback '{}' cannot be a {list} callback (phase '{kind}', step '{}')",
                cb.name(),
                step.name
            ),
        }),
        None => Ok(()),
    }
}

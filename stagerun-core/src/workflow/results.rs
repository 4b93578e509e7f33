//! Accumulated experiment results: step and phase timings plus values recorded
//! by callbacks.

use crate::persistence::atomic_write_json;
use crate::workflow::types::PhaseKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Timing of one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub phase: PhaseKind,
    pub step: String,
    pub iterations: u64,
    pub elapsed_secs: f64,
}

/// Timing of one completed phase, the sum of its steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: PhaseKind,
    pub elapsed_secs: f64,
}

/// Results accumulated over the lifetime of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepTiming>,
    pub phases: Vec<PhaseTiming>,
    pub total_elapsed_secs: Option<f64>,
    pub total_iterations: u64,
    /// Free-form values written by callbacks.
    pub values: BTreeMap<String, serde_json::Value>,
}

impl Default for ExperimentResults {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentResults {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            phases: Vec::new(),
            total_elapsed_secs: None,
            total_iterations: 0,
            values: BTreeMap::new(),
        }
    }

    pub(crate) fn record_step(&mut self, phase: PhaseKind, step: &str, iterations: u64, elapsed: Duration) {
        self.total_iterations += iterations;
        self.steps.push(StepTiming {
            phase,
            step: step.to_string(),
            iterations,
            elapsed_secs: elapsed.as_secs_f64(),
        });
    }

    pub(crate) fn record_phase(&mut self, phase: PhaseKind) {
        let elapsed_secs = self
            .steps
            .iter()
            .filter(|s| s.phase == phase)
            .map(|s| s.elapsed_secs)
            .sum();
        self.phases.push(PhaseTiming { phase, elapsed_secs });
    }

    pub(crate) fn finalize(&mut self) {
        self.total_elapsed_secs = Some(self.phases.iter().map(|p| p.elapsed_secs).sum());
        self.finished_at = Some(Utc::now());
    }

    /// Timing of a completed step, if it has completed.
    pub fn step_timing(&self, phase: PhaseKind, step: &str) -> Option<&StepTiming> {
        self.steps.iter().find(|s| s.phase == phase && s.step == step)
    }

    /// Write the results as pretty JSON.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        atomic_write_json(path, self)
    }
}

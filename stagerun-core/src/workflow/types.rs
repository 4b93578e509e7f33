//! Workflow type definitions for the stagerun orchestrator.
//!
//! Defines the canonical phases, their checkpoint names, iteration budgets,
//! the resumable execution cursor, and the step/phase structures.

use crate::error::ConfigError;
use crate::workflow::callback::Callback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// A stage of the canonical pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Build,
    Stage1Train,
    Stage2Train,
    ClassifierTrain,
    Infer,
}

impl PhaseKind {
    /// Every phase in canonical order.
    pub const ALL: [PhaseKind; 5] = [
        PhaseKind::Build,
        PhaseKind::Stage1Train,
        PhaseKind::Stage2Train,
        PhaseKind::ClassifierTrain,
        PhaseKind::Infer,
    ];

    /// Position of this phase in the canonical sequence.
    pub fn index(self) -> usize {
        match self {
            PhaseKind::Build => 0,
            PhaseKind::Stage1Train => 1,
            PhaseKind::Stage2Train => 2,
            PhaseKind::ClassifierTrain => 3,
            PhaseKind::Infer => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::Build => "build",
            PhaseKind::Stage1Train => "stage1_train",
            PhaseKind::Stage2Train => "stage2_train",
            PhaseKind::ClassifierTrain => "classifier_train",
            PhaseKind::Infer => "infer",
        }
    }

    /// The checkpoint written when this phase completes, if any.
    pub fn checkpoint(self) -> Option<CheckpointName> {
        match self {
            PhaseKind::Build => Some(CheckpointName::NetworkCreated),
            PhaseKind::Stage1Train => Some(CheckpointName::Stage1Trained),
            PhaseKind::Stage2Train => Some(CheckpointName::Stage2Trained),
            PhaseKind::ClassifierTrain => Some(CheckpointName::FullyTrained),
            PhaseKind::Infer => None,
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PhaseKind::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownPhase {
                name: s.to_string(),
            })
    }
}

/// Named engine snapshot, tied one-to-one to the phase that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointName {
    #[serde(rename = "networkCreatedCheckpoint")]
    NetworkCreated,
    #[serde(rename = "stage1TrainedCheckpoint")]
    Stage1Trained,
    #[serde(rename = "stage2TrainedCheckpoint")]
    Stage2Trained,
    #[serde(rename = "fullyTrainedCheckpoint")]
    FullyTrained,
}

impl CheckpointName {
    pub const ALL: [CheckpointName; 4] = [
        CheckpointName::NetworkCreated,
        CheckpointName::Stage1Trained,
        CheckpointName::Stage2Trained,
        CheckpointName::FullyTrained,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CheckpointName::NetworkCreated => "networkCreatedCheckpoint",
            CheckpointName::Stage1Trained => "stage1TrainedCheckpoint",
            CheckpointName::Stage2Trained => "stage2TrainedCheckpoint",
            CheckpointName::FullyTrained => "fullyTrainedCheckpoint",
        }
    }

    /// The phase whose completion produced this checkpoint.
    pub fn produced_by(self) -> PhaseKind {
        match self {
            CheckpointName::NetworkCreated => PhaseKind::Build,
            CheckpointName::Stage1Trained => PhaseKind::Stage1Train,
            CheckpointName::Stage2Trained => PhaseKind::Stage2Train,
            CheckpointName::FullyTrained => PhaseKind::ClassifierTrain,
        }
    }

    fn expected_labels() -> String {
        CheckpointName::ALL
            .iter()
            .map(|c| c.label())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for CheckpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CheckpointName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckpointName::ALL
            .into_iter()
            .find(|c| c.label() == s)
            .ok_or_else(|| ConfigError::UnknownResumePoint {
                name: s.to_string(),
                expected: CheckpointName::expected_labels(),
            })
    }
}

/// How many engine iterations a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum IterationBudget {
    /// Exactly this many iterations; running out of data first is fatal.
    Fixed { count: u64 },
    /// Until the data source is exhausted, optionally stopping at `limit`.
    UntilExhausted { limit: Option<u64> },
}

impl IterationBudget {
    pub fn fixed(count: u64) -> Self {
        IterationBudget::Fixed { count }
    }

    pub fn until_exhausted() -> Self {
        IterationBudget::UntilExhausted { limit: None }
    }

    /// Iterations left after `done` have run. `None` means unbounded.
    pub fn remaining(&self, done: u64) -> Option<u64> {
        match self {
            IterationBudget::Fixed { count } => Some(count.saturating_sub(done)),
            IterationBudget::UntilExhausted { limit } => {
                limit.map(|l| l.saturating_sub(done))
            }
        }
    }

    /// The finite count whose shortfall is an error, if any.
    pub fn required(&self) -> Option<u64> {
        match self {
            IterationBudget::Fixed { count } => Some(*count),
            IterationBudget::UntilExhausted { .. } => None,
        }
    }

    /// Upper bound on `Position::iter` for this budget.
    pub fn upper_bound(&self) -> Option<u64> {
        match self {
            IterationBudget::Fixed { count } => Some(*count),
            IterationBudget::UntilExhausted { limit } => *limit,
        }
    }

    /// Apply a test-mode cap, keeping the exhaustion semantics intact.
    pub fn capped(self, cap: u64) -> Self {
        match self {
            IterationBudget::Fixed { count } => IterationBudget::Fixed {
                count: count.min(cap),
            },
            IterationBudget::UntilExhausted { limit } => IterationBudget::UntilExhausted {
                limit: Some(limit.map_or(cap, |l| l.min(cap))),
            },
        }
    }
}

impl fmt::Display for IterationBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationBudget::Fixed { count } => write!(f, "{count}"),
            IterationBudget::UntilExhausted { limit: None } => write!(f, "until exhausted"),
            IterationBudget::UntilExhausted { limit: Some(l) } => {
                write!(f, "until exhausted (max {l})")
            }
        }
    }
}

/// Cursor identifying exactly where execution stands in the workflow.
///
/// Only the orchestrator advances it; everyone else reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    phase: usize,
    step: usize,
    iter: u64,
}

impl Position {
    pub fn phase(&self) -> usize {
        self.phase
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn iter(&self) -> u64 {
        self.iter
    }

    pub(crate) fn advance_iter(&mut self, bound: Option<u64>) {
        self.iter += 1;
        debug_assert!(
            bound.is_none_or(|b| self.iter <= b),
            "iteration {} exceeds budget {:?}",
            self.iter,
            bound
        );
    }

    pub(crate) fn complete_step(&mut self, step_count: usize) {
        self.step += 1;
        self.iter = 0;
        debug_assert!(self.step <= step_count, "step {} of {}", self.step, step_count);
    }

    pub(crate) fn complete_phase(&mut self, phase_count: usize) {
        self.phase += 1;
        self.step = 0;
        self.iter = 0;
        debug_assert!(
            self.phase <= phase_count,
            "phase {} of {}",
            self.phase,
            phase_count
        );
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {} / step {} / iter {}", self.phase, self.step, self.iter)
    }
}

/// Wall-clock timer that only accumulates while running.
#[derive(Debug, Clone)]
pub struct StepTimer {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl StepTimer {
    pub fn start() -> Self {
        Self {
            accumulated: Duration::ZERO,
            running_since: Some(Instant::now()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn suspend(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn stop(mut self) -> Duration {
        self.suspend();
        self.accumulated
    }
}

/// A named unit of work with an iteration budget and callback hooks.
pub struct Step {
    pub name: String,
    pub budget: IterationBudget,
    pub setup: Vec<Callback>,
    pub iter: Vec<Callback>,
    pub finish: Vec<Callback>,
    pub(crate) timer: Option<StepTimer>,
}

impl Step {
    pub fn new(name: impl Into<String>, budget: IterationBudget) -> Self {
        Self {
            name: name.into(),
            budget,
            setup: Vec::new(),
            iter: Vec::new(),
            finish: Vec::new(),
            timer: None,
        }
    }

    pub fn on_setup(mut self, callback: impl Into<Callback>) -> Self {
        self.setup.push(callback.into());
        self
    }

    pub fn on_iteration(mut self, callback: impl Into<Callback>) -> Self {
        self.iter.push(callback.into());
        self
    }

    pub fn on_finish(mut self, callback: impl Into<Callback>) -> Self {
        self.finish.push(callback.into());
        self
    }

    /// The step's timer, present only while the step is in progress.
    pub fn timer(&self) -> Option<&StepTimer> {
        self.timer.as_ref()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |list: &[Callback]| list.iter().map(|c| c.name().to_string()).collect::<Vec<_>>();
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("budget", &self.budget)
            .field("setup", &names(&self.setup))
            .field("iter", &names(&self.iter))
            .field("finish", &names(&self.finish))
            .field("timer", &self.timer)
            .finish()
    }
}

/// An ordered sequence of steps sharing a phase identity.
#[derive(Debug)]
pub struct Phase {
    pub kind: PhaseKind,
    pub steps: Vec<Step>,
}

impl Phase {
    pub fn new(kind: PhaseKind, steps: Vec<Step>) -> Self {
        Self { kind, steps }
    }
}

/// Coarse lifecycle state of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Paused,
    Done,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::NotStarted => write!(f, "not_started"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Done => write!(f, "done"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

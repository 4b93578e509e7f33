//! Compute engine contract consumed by the orchestrator.
//!
//! The orchestrator only ever calls `build`, `run(1)`, `save` and `load`.
//! The parameter accessors exist for callbacks.

pub mod checkpoint;
pub mod replay;

pub use checkpoint::{CheckpointEntry, CheckpointStore};
pub use replay::ReplayEngine;

use crate::error::EngineError;
use serde_json::Value;

/// Outcome of asking the engine to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The requested iterations ran.
    Continued,
    /// The data source ran dry before the iteration could run.
    Exhausted,
}

/// An external dataflow engine driven one iteration at a time.
pub trait ComputeEngine: Send {
    /// Construct the engine from its own configuration.
    fn build(&mut self) -> Result<(), EngineError>;

    /// Run `iterations` synchronous iterations.
    fn run(&mut self, iterations: u64) -> Result<IterationOutcome, EngineError>;

    fn save(&mut self, label: &str) -> Result<(), EngineError>;

    fn load(&mut self, label: &str) -> Result<(), EngineError>;

    fn get_parameter(&self, path: &str, name: &str) -> Result<Value, EngineError>;

    fn set_parameter(&mut self, path: &str, name: &str, value: Value) -> Result<(), EngineError>;
}

impl<E: ComputeEngine + ?Sized> ComputeEngine for Box<E> {
    fn build(&mut self) -> Result<(), EngineError> {
        (**self).build()
    }

    fn run(&mut self, iterations: u64) -> Result<IterationOutcome, EngineError> {
        (**self).run(iterations)
    }

    fn save(&mut self, label: &str) -> Result<(), EngineError> {
        (**self).save(label)
    }

    fn load(&mut self, label: &str) -> Result<(), EngineError> {
        (**self).load(label)
    }

    fn get_parameter(&self, path: &str, name: &str) -> Result<Value, EngineError> {
        (**self).get_parameter(path, name)
    }

    fn set_parameter(&mut self, path: &str, name: &str, value: Value) -> Result<(), EngineError> {
        (**self).set_parameter(path, name, value)
    }
}

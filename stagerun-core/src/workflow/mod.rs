//! Experiment workflow engine.
//!
//! Models an experiment as phases of steps of iterations, selects the phases
//! to run from the run options, and executes them with pause/resume support.
//! Pipelines come from code or from a YAML definition.

pub mod builtins;
pub mod callback;
pub mod executor;
pub mod mode;
pub mod parser;
pub mod pipeline;
pub mod results;
pub mod types;

pub use builtins::{
    DEFAULT_PIPELINE, LogMessage, PauseAfter, PauseEvery, PauseOnce, RecordParameter, SetParameter,
};
pub use callback::{
    Callback, CallbackResult, ExperimentContext, IterationCallback, SimpleCallback, StepHook,
};
pub use executor::Experiment;
pub use mode::{
    DEFAULT_TEST_MODE_ITERATIONS, ExperimentOptions, RunMode, RunOptions, WorkflowPlan,
};
pub use parser::{
    HookSpec, PhaseDefinition, PipelineDefinition, StepDefinition, default_pipeline,
    load_pipeline, parse_pipeline, validate_pipeline,
};
pub use pipeline::Pipeline;
pub use results::{ExperimentResults, PhaseTiming, StepTiming};
pub use types::{
    CheckpointName, IterationBudget, Phase, PhaseKind, Position, RunStatus, Step, StepTimer,
};

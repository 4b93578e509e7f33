//! Experiment orchestrator: walks phases, steps and iterations, driving the
//! engine one iteration at a time and stopping cleanly whenever a callback
//! asks to pause.
//!
//! All state lives in [`Experiment`]; calling [`Experiment::run`] again after
//! a pause continues from the exact [`Position`] where it stopped.

use crate::engine::{ComputeEngine, IterationOutcome};
use crate::error::{ExperimentError, HookKind, Result};
use crate::workflow::callback::{Callback, ExperimentContext};
use crate::workflow::mode::{ExperimentOptions, RunMode};
use crate::workflow::pipeline::Pipeline;
use crate::workflow::results::ExperimentResults;
use crate::workflow::types::{
    CheckpointName, IterationBudget, Phase, PhaseKind, Position, RunStatus, Step, StepTimer,
};
use tracing::{debug, info, warn};

const UNBOUNDED_PROGRESS_INTERVAL: u64 = 1000;

/// How often to log progress for a step with `bound` iterations.
pub(crate) fn progress_interval(bound: Option<u64>) -> u64 {
    match bound {
        Some(n) => (n / 20).min(1000).max(1),
        None => UNBOUNDED_PROGRESS_INTERVAL,
    }
}

/// A resumable experiment over a compute engine.
pub struct Experiment<E: ComputeEngine> {
    workflow: Vec<Phase>,
    state: RunState<E>,
}

/// Everything except the workflow itself, so steps can be borrowed mutably
/// while callbacks get mutable access to the engine.
struct RunState<E> {
    engine: E,
    options: ExperimentOptions,
    position: Position,
    checkpoint: Option<CheckpointName>,
    results: ExperimentResults,
    paused: bool,
    started: bool,
    done: bool,
    failed: bool,
}

impl<E: ComputeEngine> Experiment<E> {
    /// Validate the pipeline, select the planned phases and prepare the engine.
    ///
    /// The engine is loaded from the plan's checkpoint when there is one and
    /// built from scratch otherwise. Exactly one of the two happens.
    pub fn new(mut engine: E, pipeline: Pipeline, options: ExperimentOptions) -> Result<Self> {
        pipeline.validate()?;
        let plan = options.plan();
        let mut workflow = pipeline.take_phases(plan.phase_kinds());

        if let Some(cap) = options.iteration_cap {
            for step in workflow.iter_mut().flat_map(|p| p.steps.iter_mut()) {
                step.budget = step.budget.capped(cap);
            }
            debug!(cap, "test mode caps every step budget");
        }

        match plan.checkpoint {
            Some(checkpoint) => {
                engine
                    .load(checkpoint.label())
                    .map_err(|source| ExperimentError::CheckpointLoad {
                        label: checkpoint.label().to_string(),
                        source,
                    })?;
                info!(checkpoint = %checkpoint, "network loaded");
            }
            None => {
                engine.build().map_err(ExperimentError::Build)?;
                info!("network built");
            }
        }

        let phases: Vec<_> = workflow.iter().map(|p| p.kind.as_str()).collect();
        info!(mode = ?options.mode, phases = ?phases, "experiment ready");

        Ok(Self {
            workflow,
            state: RunState {
                engine,
                options,
                position: Position::default(),
                checkpoint: plan.checkpoint,
                results: ExperimentResults::new(),
                paused: true,
                started: false,
                done: false,
                failed: false,
            },
        })
    }

    /// Run until the workflow completes or a callback pauses.
    ///
    /// After completion this is a no-op returning [`RunStatus::Done`]. After
    /// a fatal error it returns [`ExperimentError::Aborted`].
    pub fn run(&mut self) -> Result<RunStatus> {
        if self.state.failed {
            return Err(ExperimentError::Aborted);
        }
        if self.state.done {
            return Ok(RunStatus::Done);
        }

        if self.state.started {
            info!(position = %self.state.position, "resuming experiment");
        }
        self.state.started = true;
        self.state.paused = false;

        match self.run_phases() {
            Ok(status) => Ok(status),
            Err(e) => {
                self.state.failed = true;
                warn!(position = %self.state.position, error = %e, "experiment failed");
                Err(e)
            }
        }
    }

    fn run_phases(&mut self) -> Result<RunStatus> {
        let phase_count = self.workflow.len();
        while self.state.position.phase() < phase_count {
            let phase = &mut self.workflow[self.state.position.phase()];
            // A finish callback on the phase's last step may pause after the
            // phase completed; Done is only reached by a later run().
            if !self.state.run_phase(phase, phase_count)? || self.state.paused {
                warn!(position = %self.state.position, "experiment paused");
                return Ok(RunStatus::Paused);
            }
        }

        self.state.done = true;
        self.state.results.finalize();
        info!(
            iterations = self.state.results.total_iterations,
            elapsed_secs = self.state.results.total_elapsed_secs.unwrap_or_default(),
            "experiment complete"
        );
        Ok(RunStatus::Done)
    }

    pub fn status(&self) -> RunStatus {
        let s = &self.state;
        if s.failed {
            RunStatus::Failed
        } else if s.done {
            RunStatus::Done
        } else if !s.started {
            RunStatus::NotStarted
        } else if s.paused {
            RunStatus::Paused
        } else {
            RunStatus::Running
        }
    }

    pub fn position(&self) -> &Position {
        &self.state.position
    }

    pub fn is_done(&self) -> bool {
        self.state.done
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn workflow(&self) -> &[Phase] {
        &self.workflow
    }

    pub fn options(&self) -> &ExperimentOptions {
        &self.state.options
    }

    /// The checkpoint most recently loaded or saved.
    pub fn checkpoint(&self) -> Option<CheckpointName> {
        self.state.checkpoint
    }

    pub fn results(&self) -> &ExperimentResults {
        &self.state.results
    }

    pub fn engine(&self) -> &E {
        &self.state.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.state.engine
    }

    pub fn into_engine(self) -> E {
        self.state.engine
    }
}

impl<E: ComputeEngine> RunState<E> {
    /// Returns `true` once every step of the phase has completed.
    fn run_phase(&mut self, phase: &mut Phase, phase_count: usize) -> Result<bool> {
        if self.paused {
            return Ok(false);
        }

        let kind = phase.kind;
        let step_count = phase.steps.len();
        if self.position.step() == 0 && self.position.iter() == 0 {
            info!(phase = %kind, steps = step_count, "phase started");
        }

        while self.position.step() < step_count {
            if self.paused {
                return Ok(false);
            }
            let step = &mut phase.steps[self.position.step()];
            if !self.run_step(kind, step, step_count)? {
                return Ok(false);
            }
        }

        self.position.complete_phase(phase_count);
        self.results.record_phase(kind);
        info!(phase = %kind, "phase complete");

        if let Some(checkpoint) = kind.checkpoint()
            && self.saves_after(kind)
        {
            self.engine
                .save(checkpoint.label())
                .map_err(|source| ExperimentError::CheckpointSave {
                    label: checkpoint.label().to_string(),
                    source,
                })?;
            self.checkpoint = Some(checkpoint);
            info!(checkpoint = %checkpoint, "checkpoint saved");
        }
        Ok(true)
    }

    fn saves_after(&self, kind: PhaseKind) -> bool {
        self.options.checkpoint_enabled
            || (self.options.mode == RunMode::CreateOnly && kind == PhaseKind::Build)
    }

    /// Returns `true` once the step has completed and its finish callbacks ran.
    fn run_step(&mut self, kind: PhaseKind, step: &mut Step, step_count: usize) -> Result<bool> {
        if self.position.iter() == 0 && step.timer.is_none() {
            step.timer = Some(StepTimer::start());
            debug!(phase = %kind, step = %step.name, budget = %step.budget, "step setup");
            self.invoke_all(kind, &step.name, &mut step.setup, HookKind::Setup, None)?;
            if self.paused {
                suspend(step);
                return Ok(false);
            }
        } else {
            debug_assert!(step.timer.is_some(), "step {} resumed without a timer", step.name);
            if let Some(timer) = step.timer.as_mut() {
                timer.resume();
            }
            debug!(phase = %kind, step = %step.name, iter = self.position.iter(), "step resumed");
        }

        let remaining = step.budget.remaining(self.position.iter());
        if !self.run_network_iterations(kind, step, remaining)? {
            suspend(step);
            return Ok(false);
        }

        let elapsed = step.timer.take().map(StepTimer::stop).unwrap_or_default();
        let iterations = self.position.iter();
        if let IterationBudget::Fixed { count } = step.budget {
            debug_assert_eq!(iterations, count, "fixed step finished off budget");
        }
        self.results.record_step(kind, &step.name, iterations, elapsed);
        self.position.complete_step(step_count);
        debug!(
            phase = %kind,
            step = %step.name,
            iterations,
            elapsed_secs = elapsed.as_secs_f64(),
            "step complete"
        );

        self.invoke_all(kind, &step.name, &mut step.finish, HookKind::Finish, None)?;
        Ok(true)
    }

    /// Run up to `remaining` iterations (`None` means until the data runs out).
    /// Returns `false` when a callback paused before the step completed.
    fn run_network_iterations(
        &mut self,
        kind: PhaseKind,
        step: &mut Step,
        remaining: Option<u64>,
    ) -> Result<bool> {
        if remaining == Some(0) {
            return Ok(true);
        }
        let bound = step.budget.upper_bound();
        let interval = progress_interval(bound);

        loop {
            match self.engine.run(1) {
                Ok(IterationOutcome::Continued) => {}
                Ok(IterationOutcome::Exhausted) => {
                    let iteration = self.position.iter();
                    return match step.budget.required() {
                        Some(budget) => Err(ExperimentError::DataExhausted {
                            phase: kind,
                            step: step.name.clone(),
                            iteration,
                            budget,
                        }),
                        None => {
                            debug!(phase = %kind, step = %step.name, iteration, "data source exhausted");
                            Ok(true)
                        }
                    };
                }
                Err(source) => {
                    return Err(ExperimentError::Engine {
                        phase: kind,
                        step: step.name.clone(),
                        source,
                    });
                }
            }

            let index = self.position.iter();
            self.invoke_all(kind, &step.name, &mut step.iter, HookKind::Iteration, Some(index))?;
            self.position.advance_iter(bound);

            let done = self.position.iter();
            if done % interval == 0 {
                info!(phase = %kind, step = %step.name, iteration = done, budget = %step.budget, "progress");
            }
            if self.paused {
                return Ok(false);
            }
            if bound.is_some_and(|b| done >= b) {
                return Ok(true);
            }
        }
    }

    fn invoke_all(
        &mut self,
        phase: PhaseKind,
        step: &str,
        callbacks: &mut [Callback],
        hook: HookKind,
        iteration: Option<u64>,
    ) -> Result<()> {
        for callback in callbacks.iter_mut() {
            let mut ctx = ExperimentContext {
                engine: &mut self.engine,
                position: &self.position,
                paused: &mut self.paused,
                results: &mut self.results,
                phase,
                step,
            };
            callback
                .invoke(&mut ctx, iteration)
                .map_err(|source| ExperimentError::Callback {
                    callback: callback.name().to_string(),
                    hook,
                    phase,
                    step: step.to_string(),
                    iteration,
                    source,
                })?;
        }
        Ok(())
    }
}

fn suspend(step: &mut Step) {
    if let Some(timer) = step.timer.as_mut() {
        timer.suspend();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CheckpointStore, ReplayEngine};
    use crate::workflow::builtins::{PauseAfter, PauseOnce};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn single_step(kind: PhaseKind, step: Step) -> Pipeline {
        Pipeline::new().step(kind, step)
    }

    fn counter() -> (Arc<AtomicUsize>, Callback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let cb = Callback::simple("count", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, cb)
    }

    #[test]
    fn test_progress_interval() {
        assert_eq!(progress_interval(Some(10)), 1);
        assert_eq!(progress_interval(Some(200)), 10);
        assert_eq!(progress_interval(Some(1_000_000)), 1000);
        assert_eq!(progress_interval(None), 1000);
    }

    #[test]
    fn test_fixed_step_runs_exact_budget() {
        let pipeline = single_step(
            PhaseKind::Stage1Train,
            Step::new("learn", IterationBudget::fixed(4)),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(10), pipeline, ExperimentOptions::default())
                .unwrap();
        assert_eq!(exp.status(), RunStatus::NotStarted);
        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert_eq!(exp.engine().iterations(), 4);
        assert_eq!(exp.position().phase(), 5);
        assert_eq!(
            exp.results()
                .step_timing(PhaseKind::Stage1Train, "learn")
                .unwrap()
                .iterations,
            4
        );
    }

    #[test]
    fn test_pause_then_resume_completes_budget() {
        let pipeline = single_step(
            PhaseKind::Stage2Train,
            Step::new("learn", IterationBudget::fixed(6)).on_iteration(Callback::hook(PauseAfter::new(2))),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(10), pipeline, ExperimentOptions::default())
                .unwrap();
        assert_eq!(exp.run().unwrap(), RunStatus::Paused);
        assert_eq!(exp.status(), RunStatus::Paused);
        assert_eq!(exp.position().phase(), PhaseKind::Stage2Train.index());
        assert_eq!(exp.position().iter(), 2);
        assert!(exp.workflow()[2].steps[0].timer().is_some_and(|t| !t.is_running()));

        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert_eq!(exp.engine().iterations(), 6);
    }

    #[test]
    fn test_setup_runs_once_when_it_pauses() {
        let (count, cb) = counter();
        let pipeline = single_step(
            PhaseKind::Infer,
            Step::new("classify", IterationBudget::fixed(3))
                .on_setup(cb)
                .on_setup(Callback::hook(PauseOnce::new())),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(5), pipeline, ExperimentOptions::default())
                .unwrap();
        assert_eq!(exp.run().unwrap(), RunStatus::Paused);
        assert_eq!(exp.position().iter(), 0);
        assert_eq!(exp.engine().iterations(), 0);
        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(exp.engine().iterations(), 3);
    }

    #[test]
    fn test_run_after_done_is_noop() {
        let (count, cb) = counter();
        let pipeline = single_step(
            PhaseKind::Stage1Train,
            Step::new("learn", IterationBudget::fixed(2)).on_finish(cb),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(3), pipeline, ExperimentOptions::default())
                .unwrap();
        exp.run().unwrap();
        let position = *exp.position();
        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert_eq!(*exp.position(), position);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(exp.engine().iterations(), 2);
    }

    #[test]
    fn test_fixed_step_out_of_data_is_fatal() {
        let pipeline = single_step(
            PhaseKind::Stage1Train,
            Step::new("learn", IterationBudget::fixed(10)),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(7), pipeline, ExperimentOptions::default())
                .unwrap();
        let err = exp.run().unwrap_err();
        assert!(err.to_string().contains("ran out of data at iteration 7 of 10"));
        assert_eq!(exp.status(), RunStatus::Failed);
        assert!(!exp.is_done());
        assert!(matches!(exp.run(), Err(ExperimentError::Aborted)));
    }

    #[test]
    fn test_until_exhausted_step_completes() {
        let pipeline = single_step(
            PhaseKind::Infer,
            Step::new("classify", IterationBudget::until_exhausted()),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(7), pipeline, ExperimentOptions::default())
                .unwrap();
        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert_eq!(exp.results().total_iterations, 7);
    }

    #[test]
    fn test_zero_budget_step_skips_engine() {
        let pipeline = single_step(
            PhaseKind::Stage1Train,
            Step::new("noop", IterationBudget::fixed(0)),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(0), pipeline, ExperimentOptions::default())
                .unwrap();
        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert_eq!(exp.engine().iterations(), 0);
    }

    #[test]
    fn test_test_mode_caps_budgets() {
        let pipeline = Pipeline::new()
            .step(PhaseKind::Stage1Train, Step::new("learn", IterationBudget::fixed(500)))
            .step(PhaseKind::Infer, Step::new("classify", IterationBudget::until_exhausted()));
        let options = ExperimentOptions::default().with_test_mode(3);
        let mut exp = Experiment::new(ReplayEngine::synthetic(100), pipeline, options).unwrap();
        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert_eq!(exp.engine().iterations(), 6);
    }

    #[test]
    fn test_create_only_saves_network_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let engine = ReplayEngine::synthetic(5).with_store(store.clone());
        let options = ExperimentOptions::default().with_mode(RunMode::CreateOnly);
        let mut exp = Experiment::new(engine, Pipeline::new(), options).unwrap();
        assert_eq!(exp.workflow().len(), 1);
        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert_eq!(exp.checkpoint(), Some(CheckpointName::NetworkCreated));
        assert!(store.contains("networkCreatedCheckpoint").unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_checkpointing_saves_every_training_phase() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let engine = ReplayEngine::synthetic(5).with_store(store.clone());
        let pipeline = single_step(
            PhaseKind::Stage1Train,
            Step::new("learn", IterationBudget::fixed(2)),
        );
        let options = ExperimentOptions::default().with_checkpointing(true);
        let mut exp = Experiment::new(engine, pipeline, options).unwrap();
        exp.run().unwrap();
        let labels: Vec<_> = store.list().unwrap().into_iter().map(|c| c.label).collect();
        assert_eq!(
            labels,
            vec![
                "networkCreatedCheckpoint",
                "stage1TrainedCheckpoint",
                "stage2TrainedCheckpoint",
                "fullyTrainedCheckpoint"
            ]
        );
    }

    #[test]
    fn test_infer_only_without_checkpoint_fails_to_construct() {
        let dir = TempDir::new().unwrap();
        let engine = ReplayEngine::synthetic(5).with_store(CheckpointStore::new(dir.path()));
        let options = ExperimentOptions::default().with_mode(RunMode::InferOnly);
        let err = Experiment::new(engine, Pipeline::new(), options).err().unwrap();
        let msg = err.to_string();
        assert!(msg.starts_with("loading network failed, check available checkpoints"));
        assert!(msg.contains("fullyTrainedCheckpoint"));
    }

    #[test]
    fn test_callbacks_reach_engine_parameters() {
        let pipeline = single_step(
            PhaseKind::Stage1Train,
            Step::new("learn", IterationBudget::fixed(3))
                .on_setup(Callback::simple("learn_on", |ctx| {
                    ctx.set_parameter("stage1", "learningMode", json!(true))?;
                    Ok(())
                }))
                .on_finish(Callback::simple("collect", |ctx| {
                    let learned = ctx.get_parameter("stage1", "learnedIterations")?;
                    ctx.record("learned", learned);
                    Ok(())
                })),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(5), pipeline, ExperimentOptions::default())
                .unwrap();
        exp.run().unwrap();
        assert_eq!(exp.results().values["learned"], json!(3));
    }

    #[test]
    fn test_run_clears_pause_flag() {
        let pipeline = single_step(
            PhaseKind::Stage1Train,
            Step::new("learn", IterationBudget::fixed(4)).on_iteration(Callback::iteration(
                "halfway",
                |ctx, i| {
                    if i == 1 {
                        ctx.pause();
                    }
                    Ok(())
                },
            )),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(10), pipeline, ExperimentOptions::default())
                .unwrap();
        assert!(exp.is_paused());
        assert_eq!(exp.run().unwrap(), RunStatus::Paused);
        assert!(exp.is_paused());
        assert_eq!(exp.position().iter(), 2);
        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert!(!exp.is_paused());
        assert_eq!(exp.engine().iterations(), 4);
    }

    #[test]
    fn test_finish_pause_on_final_phase_is_not_done() {
        let (count, cb) = counter();
        let pipeline = single_step(
            PhaseKind::Infer,
            Step::new("classify", IterationBudget::fixed(2))
                .on_finish(cb)
                .on_finish(Callback::hook(PauseOnce::new())),
        );
        let mut exp =
            Experiment::new(ReplayEngine::synthetic(5), pipeline, ExperimentOptions::default())
                .unwrap();
        assert_eq!(exp.run().unwrap(), RunStatus::Paused);
        assert_eq!(exp.status(), RunStatus::Paused);
        assert!(!exp.is_done());
        assert_eq!(exp.position().phase(), 5);
        assert!(exp.results().total_elapsed_secs.is_none());

        assert_eq!(exp.run().unwrap(), RunStatus::Done);
        assert!(exp.is_done());
        assert_eq!(exp.engine().iterations(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

//! Built-in step hooks and the pipeline definition shipped with stagerun.

use crate::workflow::callback::{CallbackResult, ExperimentContext, StepHook};
use serde_json::Value;

/// Set an engine parameter, e.g. toggling learning mode around a step.
#[derive(Debug, Clone)]
pub struct SetParameter {
    label: String,
    path: String,
    name: String,
    value: Value,
}

impl SetParameter {
    pub fn new(path: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        let (path, name) = (path.into(), name.into());
        Self {
            label: format!("set_parameter({path}.{name}={value})"),
            path,
            name,
            value,
        }
    }
}

impl StepHook for SetParameter {
    fn name(&self) -> &str {
        &self.label
    }

    fn invoke(&mut self, ctx: &mut ExperimentContext<'_>, _iteration: Option<u64>) -> CallbackResult {
        ctx.set_parameter(&self.path, &self.name, self.value.clone())?;
        Ok(())
    }
}

/// Copy an engine parameter into the experiment results.
#[derive(Debug, Clone)]
pub struct RecordParameter {
    label: String,
    path: String,
    name: String,
    key: String,
}

impl RecordParameter {
    pub fn new(path: impl Into<String>, name: impl Into<String>, key: impl Into<String>) -> Self {
        let (path, name, key) = (path.into(), name.into(), key.into());
        Self {
            label: format!("record_parameter({path}.{name} -> {key})"),
            path,
            name,
            key,
        }
    }
}

impl StepHook for RecordParameter {
    fn name(&self) -> &str {
        &self.label
    }

    fn invoke(&mut self, ctx: &mut ExperimentContext<'_>, _iteration: Option<u64>) -> CallbackResult {
        let value = ctx.get_parameter(&self.path, &self.name)?;
        ctx.record(self.key.clone(), value);
        Ok(())
    }
}

/// Emit a log line, tagged with the current phase and step.
#[derive(Debug, Clone)]
pub struct LogMessage {
    message: String,
}

impl LogMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl StepHook for LogMessage {
    fn name(&self) -> &str {
        "log"
    }

    fn invoke(&mut self, ctx: &mut ExperimentContext<'_>, iteration: Option<u64>) -> CallbackResult {
        tracing::info!(
            phase = %ctx.phase(),
            step = ctx.step_name(),
            iteration,
            "{}",
            self.message
        );
        Ok(())
    }
}

/// Pause the first time it runs.
#[derive(Debug, Clone, Default)]
pub struct PauseOnce {
    fired: bool,
}

impl PauseOnce {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepHook for PauseOnce {
    fn name(&self) -> &str {
        "pause_once"
    }

    fn invoke(&mut self, ctx: &mut ExperimentContext<'_>, _iteration: Option<u64>) -> CallbackResult {
        if !self.fired {
            self.fired = true;
            ctx.pause();
        }
        Ok(())
    }
}

/// Pause once, after `iterations` iterations of the step have run.
#[derive(Debug, Clone)]
pub struct PauseAfter {
    iterations: u64,
    fired: bool,
}

impl PauseAfter {
    pub fn new(iterations: u64) -> Self {
        Self {
            iterations,
            fired: false,
        }
    }
}

impl StepHook for PauseAfter {
    fn name(&self) -> &str {
        "pause_after"
    }

    fn invoke(&mut self, ctx: &mut ExperimentContext<'_>, iteration: Option<u64>) -> CallbackResult {
        if let Some(i) = iteration
            && !self.fired
            && i + 1 >= self.iterations
        {
            self.fired = true;
            ctx.pause();
        }
        Ok(())
    }

    fn requires_iteration(&self) -> bool {
        true
    }
}

/// Pause after every `interval` iterations of the step.
#[derive(Debug, Clone)]
pub struct PauseEvery {
    interval: u64,
}

impl PauseEvery {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
        }
    }
}

impl StepHook for PauseEvery {
    fn name(&self) -> &str {
        "pause_every"
    }

    fn invoke(&mut self, ctx: &mut ExperimentContext<'_>, iteration: Option<u64>) -> CallbackResult {
        if let Some(i) = iteration
            && (i + 1) % self.interval == 0
        {
            ctx.pause();
        }
        Ok(())
    }

    fn requires_iteration(&self) -> bool {
        true
    }
}

/// Pipeline used when no definition file is configured.
///
/// Each training stage rewinds the sensor and learns for a fixed budget;
/// inference runs over the whole record source.
pub const DEFAULT_PIPELINE: &str = r#"
name: default
description: Train both stages and the classifier, then infer over all records
phases:
  - phase: build
  - phase: stage1_train
    steps:
      - name: learn
        iterations: 1000
        setup:
          - { hook: set_parameter, path: sensor, name: position, value: 0 }
          - { hook: set_parameter, path: stage1, name: learningMode, value: true }
        finish:
          - { hook: set_parameter, path: stage1, name: learningMode, value: false }
          - { hook: record_parameter, path: stage1, name: learnedIterations, key: stage1.learned }
  - phase: stage2_train
    steps:
      - name: learn
        iterations: 500
        setup:
          - { hook: set_parameter, path: sensor, name: position, value: 0 }
          - { hook: set_parameter, path: stage2, name: learningMode, value: true }
        finish:
          - { hook: set_parameter, path: stage2, name: learningMode, value: false }
          - { hook: record_parameter, path: stage2, name: learnedIterations, key: stage2.learned }
  - phase: classifier_train
    steps:
      - name: learn
        iterations: 200
        setup:
          - { hook: set_parameter, path: sensor, name: position, value: 0 }
          - { hook: set_parameter, path: classifier, name: learningMode, value: true }
        finish:
          - { hook: set_parameter, path: classifier, name: learningMode, value: false }
          - { hook: record_parameter, path: classifier, name: learnedIterations, key: classifier.learned }
  - phase: infer
    steps:
      - name: classify
        setup:
          - { hook: set_parameter, path: sensor, name: position, value: 0 }
          - { hook: set_parameter, path: classifier, name: inferenceMode, value: true }
          - { hook: log, message: "inference started" }
        finish:
          - { hook: set_parameter, path: classifier, name: inferenceMode, value: false }
          - { hook: record_parameter, path: sensor, name: position, key: infer.records }
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ComputeEngine;
    use crate::engine::replay::ReplayEngine;
    use crate::workflow::callback::Callback;
    use crate::workflow::results::ExperimentResults;
    use crate::workflow::types::{PhaseKind, Position};
    use serde_json::json;

    struct Harness {
        engine: ReplayEngine,
        position: Position,
        paused: bool,
        results: ExperimentResults,
    }

    impl Harness {
        fn new() -> Self {
            let mut engine = ReplayEngine::synthetic(4);
            engine.build().unwrap();
            Self {
                engine,
                position: Position::default(),
                paused: false,
                results: ExperimentResults::new(),
            }
        }

        fn invoke(&mut self, cb: &mut Callback, iteration: Option<u64>) -> CallbackResult {
            let mut ctx = ExperimentContext {
                engine: &mut self.engine,
                position: &self.position,
                paused: &mut self.paused,
                results: &mut self.results,
                phase: PhaseKind::Stage1Train,
                step: "learn",
            };
            cb.invoke(&mut ctx, iteration)
        }
    }

    #[test]
    fn test_set_and_record_parameter() {
        let mut h = Harness::new();
        let mut set = Callback::hook(SetParameter::new("stage1", "learningMode", json!(true)));
        let mut record = Callback::hook(RecordParameter::new("stage1", "learningMode", "learning"));
        assert_eq!(set.name(), "set_parameter(stage1.learningMode=true)");

        h.invoke(&mut set, None).unwrap();
        h.invoke(&mut record, None).unwrap();
        assert_eq!(h.results.values["learning"], json!(true));
    }

    #[test]
    fn test_set_unknown_parameter_fails() {
        let mut h = Harness::new();
        let mut set = Callback::hook(SetParameter::new("stage7", "learningMode", json!(true)));
        let err = h.invoke(&mut set, None).unwrap_err();
        assert!(err.to_string().contains("stage7"));
    }

    #[test]
    fn test_pause_once_only_pauses_first_time() {
        let mut h = Harness::new();
        let mut pause = Callback::hook(PauseOnce::new());
        h.invoke(&mut pause, None).unwrap();
        assert!(h.paused);
        h.paused = false;
        h.invoke(&mut pause, None).unwrap();
        assert!(!h.paused);
    }

    #[test]
    fn test_pause_after_fires_at_count() {
        let mut h = Harness::new();
        let mut pause = Callback::hook(PauseAfter::new(3));
        assert!(pause.requires_iteration());
        for i in 0..2 {
            h.invoke(&mut pause, Some(i)).unwrap();
            assert!(!h.paused);
        }
        h.invoke(&mut pause, Some(2)).unwrap();
        assert!(h.paused);
        h.paused = false;
        h.invoke(&mut pause, Some(3)).unwrap();
        assert!(!h.paused);
    }

    #[test]
    fn test_pause_every_interval() {
        let mut h = Harness::new();
        let mut pause = Callback::hook(PauseEvery::new(2));
        let mut pauses = Vec::new();
        for i in 0..6 {
            h.paused = false;
            h.invoke(&mut pause, Some(i)).unwrap();
            pauses.push(h.paused);
        }
        assert_eq!(pauses, vec![false, true, false, true, false, true]);
    }
}

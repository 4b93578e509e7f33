//! Step callbacks and the context they receive.
//!
//! A [`Callback`] is either a plain closure (`Simple`), a closure that also
//! receives the 0-based iteration index (`Iteration`), or a structured
//! [`StepHook`] such as the built-ins in [`crate::workflow::builtins`]. All
//! three are invoked through [`Callback::invoke`].

use crate::engine::ComputeEngine;
use crate::error::{BoxError, EngineError};
use crate::workflow::results::ExperimentResults;
use crate::workflow::types::{PhaseKind, Position};
use serde_json::Value;
use std::fmt;

/// Result type returned by every callback.
pub type CallbackResult = Result<(), BoxError>;

/// The experiment as seen from inside a callback.
pub struct ExperimentContext<'a> {
    pub(crate) engine: &'a mut dyn ComputeEngine,
    pub(crate) position: &'a Position,
    pub(crate) paused: &'a mut bool,
    pub(crate) results: &'a mut ExperimentResults,
    pub(crate) phase: PhaseKind,
    pub(crate) step: &'a str,
}

impl ExperimentContext<'_> {
    /// Request that the orchestrator stop at the next safe point.
    pub fn pause(&mut self) {
        *self.paused = true;
    }

    pub fn is_paused(&self) -> bool {
        *self.paused
    }

    pub fn position(&self) -> &Position {
        self.position
    }

    pub fn phase(&self) -> PhaseKind {
        self.phase
    }

    pub fn step_name(&self) -> &str {
        self.step
    }

    pub fn get_parameter(&self, path: &str, name: &str) -> Result<Value, EngineError> {
        self.engine.get_parameter(path, name)
    }

    pub fn set_parameter(&mut self, path: &str, name: &str, value: Value) -> Result<(), EngineError> {
        self.engine.set_parameter(path, name, value)
    }

    /// Store a value in the experiment results under `key`.
    pub fn record(&mut self, key: impl Into<String>, value: Value) {
        self.results.values.insert(key.into(), value);
    }

    pub fn result(&self, key: &str) -> Option<&Value> {
        self.results.values.get(key)
    }
}

/// A structured callback with a stable name.
pub trait StepHook: Send {
    fn name(&self) -> &str;

    /// `iteration` is `Some` only when invoked from an iteration list.
    fn invoke(&mut self, ctx: &mut ExperimentContext<'_>, iteration: Option<u64>) -> CallbackResult;

    /// Whether this hook needs an iteration index to make sense.
    fn requires_iteration(&self) -> bool {
        false
    }
}

type SimpleFn = dyn FnMut(&mut ExperimentContext<'_>) -> CallbackResult + Send;
type IterationFn = dyn FnMut(&mut ExperimentContext<'_>, u64) -> CallbackResult + Send;

/// Closure taking only the experiment context.
pub struct SimpleCallback {
    name: String,
    f: Box<SimpleFn>,
}

impl SimpleCallback {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&mut ExperimentContext<'_>) -> CallbackResult + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

/// Closure taking the experiment context and the 0-based iteration index.
pub struct IterationCallback {
    name: String,
    f: Box<IterationFn>,
}

impl IterationCallback {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&mut ExperimentContext<'_>, u64) -> CallbackResult + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

/// Any callback the orchestrator can invoke.
pub enum Callback {
    Simple(SimpleCallback),
    Iteration(IterationCallback),
    Hook(Box<dyn StepHook>),
}

impl Callback {
    pub fn simple<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&mut ExperimentContext<'_>) -> CallbackResult + Send + 'static,
    {
        Callback::Simple(SimpleCallback::new(name, f))
    }

    pub fn iteration<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&mut ExperimentContext<'_>, u64) -> CallbackResult + Send + 'static,
    {
        Callback::Iteration(IterationCallback::new(name, f))
    }

    pub fn hook(hook: impl StepHook + 'static) -> Self {
        Callback::Hook(Box::new(hook))
    }

    pub fn name(&self) -> &str {
        match self {
            Callback::Simple(cb) => &cb.name,
            Callback::Iteration(cb) => &cb.name,
            Callback::Hook(hook) => hook.name(),
        }
    }

    /// Whether this callback is only meaningful inside an iteration list.
    pub fn requires_iteration(&self) -> bool {
        match self {
            Callback::Simple(_) => false,
            Callback::Iteration(_) => true,
            Callback::Hook(hook) => hook.requires_iteration(),
        }
    }

    pub fn invoke(&mut self, ctx: &mut ExperimentContext<'_>, iteration: Option<u64>) -> CallbackResult {
        match self {
            Callback::Simple(cb) => (cb.f)(ctx),
            Callback::Iteration(cb) => match iteration {
                Some(i) => (cb.f)(ctx, i),
                None => Err(format!(
                    "callback '{}' needs an iteration index but was invoked outside an iteration",
                    cb.name
                )
                .into()),
            },
            Callback::Hook(hook) => hook.invoke(ctx, iteration),
        }
    }
}

impl From<SimpleCallback> for Callback {
    fn from(cb: SimpleCallback) -> Self {
        Callback::Simple(cb)
    }
}

impl From<IterationCallback> for Callback {
    fn from(cb: IterationCallback) -> Self {
        Callback::Iteration(cb)
    }
}

impl From<Box<dyn StepHook>> for Callback {
    fn from(hook: Box<dyn StepHook>) -> Self {
        Callback::Hook(hook)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Callback::Simple(_) => "Simple",
            Callback::Iteration(_) => "Iteration",
            Callback::Hook(_) => "Hook",
        };
        write!(f, "{kind}({})", self.name())
    }
}

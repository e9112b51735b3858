//! Contract between the navigator and the modules it drives.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;

use super::session::Session;
use super::step::{Frame, ModuleId, StepId, StepOutcome, StepState};
use crate::prompt::PromptSurface;

/// Successor registration handed to a step or an `on_error` hook.
///
/// Registrations are applied by the navigator only after the caller returns
/// successfully; a step that returns `Back` or fails leaves no trace.
#[derive(Debug, Default)]
pub struct CallNext {
    frames: Vec<Frame>,
}

impl CallNext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_next(&mut self, step: StepId) {
        self.frames.push(Frame::Step(step));
    }

    /// Registers the terminal sentinel instead of another step.
    pub fn finish(&mut self) {
        self.frames.push(Frame::Terminal);
    }

    /// Number of registrations made so far. Exactly one is expected per
    /// forward-moving invocation.
    pub fn registered(&self) -> usize {
        self.frames.len()
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

/// Everything a step may touch while it runs.
pub struct StepContext<'a, D> {
    pub prompts: &'a dyn PromptSurface,
    pub session: &'a mut Session<D>,
    reports: BTreeMap<String, Value>,
    next: CallNext,
    installs: Vec<Box<dyn Module<D>>>,
}

impl<'a, D> StepContext<'a, D> {
    pub fn new(
        prompts: &'a dyn PromptSurface,
        session: &'a mut Session<D>,
        reports: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            prompts,
            session,
            reports,
            next: CallNext::new(),
            installs: Vec::new(),
        }
    }

    pub fn call_next(&mut self, step: StepId) {
        self.next.call_next(step);
    }

    pub fn registered(&self) -> usize {
        self.next.registered()
    }

    /// Queues `module` for installation once this step moves forward. An
    /// instance already registered under the same id is dropped at that point.
    pub fn install(&mut self, module: Box<dyn Module<D>>) {
        self.installs.push(module);
    }

    /// Escape records of every installed module, as of the start of this step.
    pub fn module_reports(&self) -> &BTreeMap<String, Value> {
        &self.reports
    }

    pub fn into_parts(self) -> (CallNext, Vec<Box<dyn Module<D>>>) {
        (self.next, self.installs)
    }
}

/// A group of related steps with its own lifecycle hooks.
#[async_trait]
pub trait Module<D>: Send {
    fn id(&self) -> &ModuleId;

    /// Runs one step. A non-empty `state` is the committed result of an
    /// earlier run of the same step and must be honored without prompting.
    async fn run_step(
        &mut self,
        step: &StepId,
        cx: &mut StepContext<'_, D>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome>;

    /// Called after `step`'s state was committed on forward progress.
    fn on_forward(&mut self, state: &StepState);

    /// Called when a step's committed state is discarded by back navigation.
    fn on_back(&mut self, state: &StepState);

    /// Routes a fault raised by `failed` to this module's recovery step.
    fn on_error(&mut self, failed: &StepId, fault: &str, next: &mut CallNext);

    /// Escape record persisted alongside step state, if any.
    fn other_info(&self) -> Option<Value> {
        None
    }
}

/// Tracks which of a module's facts are not currently established.
///
/// Every tracked fact starts out missing. A fact present in a committed state
/// is removed on forward progress and restored when that state is backed over.
#[derive(Debug, Clone)]
pub struct MissingInfo {
    tracked: &'static [&'static str],
    missing: BTreeSet<&'static str>,
}

impl MissingInfo {
    pub fn new(tracked: &'static [&'static str]) -> Self {
        Self {
            tracked,
            missing: tracked.iter().copied().collect(),
        }
    }

    pub fn forward(&mut self, state: &StepState) {
        for fact in self.tracked {
            if state.contains(fact) {
                self.missing.remove(fact);
            }
        }
    }

    pub fn back(&mut self, state: &StepState) {
        for fact in self.tracked {
            if state.contains(fact) {
                self.missing.insert(fact);
            }
        }
    }

    pub fn is_missing(&self, fact: &str) -> bool {
        self.missing.contains(fact)
    }

    pub fn missing(&self) -> Vec<String> {
        self.missing.iter().map(|fact| fact.to_string()).collect()
    }
}

//! Drives the run stack: executes steps, commits their state, unwinds on
//! Back, routes faults to recovery steps, and persists after every change.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::module::{CallNext, Module, StepContext};
use super::registry::Registry;
use super::session::Session;
use super::snapshot::{ResumeDocument, SnapshotStore};
use super::step::{Frame, StepId, StepOutcome, StepState};
use crate::errors::WizardError;
use crate::prompt::{PromptOptions, PromptResult, PromptSurface};

pub const RESUME_TITLE: &str = "Resume Previous Discovery?";
pub const MSG_BACK_ON_RESUME: &str = "Exited due to Back selection on recovery prompt";
pub const MSG_BACK_ON_INITIAL: &str = "Exited due to Back selection on initial prompt";
pub const MSG_CANCELLED: &str = "Exited due to ESC keypress";
pub const MSG_FATAL: &str =
    "Discovery stopped because of an unexpected error. Details were saved to the resume file.";

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    BackedOut,
    Cancelled,
    Failed,
}

/// Answer to the resume prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    NothingSaved,
    Resume,
    StartFresh,
    BackedOut,
    Cancelled,
}

/// Final status of a run.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub messages: Vec<String>,
    pub fault: Option<WizardError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.fault.is_none()
    }
}

enum Flow {
    Continue,
    Stop(RunOutcome),
}

pub struct Navigator<D> {
    stack: Vec<Frame>,
    states: BTreeMap<String, StepState>,
    registry: Registry<D>,
    session: Session<D>,
    prompts: Arc<dyn PromptSurface>,
    store: Box<dyn SnapshotStore>,
    cancel: CancellationToken,
    session_id: Uuid,
}

impl<D: Send + 'static> Navigator<D> {
    pub fn new(
        session: Session<D>,
        prompts: Arc<dyn PromptSurface>,
        store: Box<dyn SnapshotStore>,
    ) -> Self {
        Self {
            stack: Vec::new(),
            states: BTreeMap::new(),
            registry: Registry::new(),
            session,
            prompts,
            store,
            cancel: CancellationToken::new(),
            session_id: Uuid::new_v4(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn install(&mut self, module: Box<dyn Module<D>>) {
        self.registry.install(module);
    }

    pub fn registry(&self) -> &Registry<D> {
        &self.registry
    }

    pub fn session(&self) -> &Session<D> {
        &self.session
    }

    pub fn stack(&self) -> &[Frame] {
        &self.stack
    }

    pub fn committed(&self, step: &StepId) -> Option<&StepState> {
        self.states.get(&step.key())
    }

    pub fn committed_states(&self) -> &BTreeMap<String, StepState> {
        &self.states
    }

    /// Offers to resume from the store's saved state.
    ///
    /// Asked once, before the first step, and never pushed onto the stack:
    /// Back here ends the session without running anything.
    pub async fn offer_resume(&mut self) -> Result<ResumeDecision, WizardError> {
        let document = match self.store.load()? {
            Some(document) if document.has_progress() => document,
            _ => return Ok(ResumeDecision::NothingSaved),
        };

        let mut lines = vec!["A previous discovery was interrupted.".to_string()];
        if let Some(saved_at) = document.saved_at {
            lines.push(format!("Saved at {}", saved_at.format("%Y-%m-%d %H:%M UTC")));
        }
        lines.push("Select Yes to continue where it stopped, No to start over.".to_string());

        let cancel = self.cancel.clone();
        let answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ResumeDecision::Cancelled),
            answer = self.prompts.yes_no(RESUME_TITLE, &lines, PromptOptions::default()) => answer,
        };
        let answer = match answer {
            Ok(answer) => answer,
            Err(_) if self.cancel.is_cancelled() => return Ok(ResumeDecision::Cancelled),
            Err(err) => return Err(err.into()),
        };

        match answer {
            PromptResult::Value(true) => {
                info!(steps = document.state.len(), "resuming saved discovery");
                self.states = document.state;
                if let Some(id) = document.session_id {
                    self.session_id = id;
                }
                Ok(ResumeDecision::Resume)
            }
            PromptResult::Back => {
                self.session.replace_messages([MSG_BACK_ON_RESUME]);
                Ok(ResumeDecision::BackedOut)
            }
            PromptResult::Value(false) | PromptResult::Other => {
                info!("discarding saved discovery");
                self.store.clear()?;
                Ok(ResumeDecision::StartFresh)
            }
        }
    }

    /// Runs the wizard from `initial` until it completes, is backed out of,
    /// is cancelled, or fails. The store is written exactly once on the way
    /// out, whichever way that is.
    pub async fn run(&mut self, initial: StepId) -> RunReport {
        info!(session = %self.session_id, initial = %initial, "starting discovery run");
        self.stack.clear();
        self.stack.push(Frame::Step(initial));

        let (outcome, fault) = match self.drive().await {
            Ok(outcome) => (outcome, None),
            Err(err) => (RunOutcome::Failed, Some(err)),
        };

        match outcome {
            RunOutcome::Completed => {}
            RunOutcome::BackedOut => self.session.replace_messages([MSG_BACK_ON_INITIAL]),
            RunOutcome::Cancelled => self.session.replace_messages([MSG_CANCELLED]),
            RunOutcome::Failed => self.session.push_message_once(MSG_FATAL),
        }
        if let Some(err) = &fault {
            error!(error = %err, "discovery run failed");
        }
        self.persist(fault.as_ref().map(WizardError::telemetry_text));
        info!(?outcome, "discovery run finished");

        RunReport {
            outcome,
            messages: self.session.messages.clone(),
            fault,
        }
    }

    async fn drive(&mut self) -> Result<RunOutcome, WizardError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            let frame = match self.stack.last() {
                Some(frame) => frame.clone(),
                None => return Ok(RunOutcome::BackedOut),
            };
            let Some(step) = frame.step_id().cloned() else {
                return Ok(RunOutcome::Completed);
            };
            if let Flow::Stop(outcome) = self.execute(&frame, &step).await? {
                return Ok(outcome);
            }
        }
    }

    async fn execute(&mut self, frame: &Frame, step: &StepId) -> Result<Flow, WizardError> {
        let key = step.key();
        let mut state = self.states.get(&key).cloned().unwrap_or_default();

        if state.errored() {
            let fault = state.error_text().unwrap_or_default().to_string();
            debug!(step = %step, "replaying recorded fault");
            self.dispatch_error(step, &fault)?;
            self.persist(None);
            return Ok(Flow::Continue);
        }

        debug!(step = %step, resumed = !state.is_empty(), "running step");
        let cancel = self.cancel.clone();
        let reports = self.registry.other_info();
        let module = self.registry.get_mut(step.module())?;
        let mut cx = StepContext::new(self.prompts.as_ref(), &mut self.session, reports);

        let result = {
            let invocation =
                AssertUnwindSafe(module.run_step(step, &mut cx, &mut state)).catch_unwind();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = invocation => Some(result),
            }
        };
        let (next, installs) = cx.into_parts();

        let Some(result) = result else {
            info!(step = %step, "cancelled while step was pending");
            return Ok(Flow::Stop(RunOutcome::Cancelled));
        };
        let result = result
            .unwrap_or_else(|panic| Err(anyhow!("step panicked: {}", panic_text(panic.as_ref()))));
        if result.is_err() && self.cancel.is_cancelled() {
            return Ok(Flow::Stop(RunOutcome::Cancelled));
        }

        match result {
            Ok(StepOutcome::Back) => {
                debug!(step = %step, "back requested");
                let flow = self.unwind(&key);
                self.persist(None);
                return Ok(flow);
            }
            Ok(outcome) => {
                let registered = next.registered();
                let mut frames = next.into_frames();
                if outcome == StepOutcome::Finish {
                    frames.push(Frame::Terminal);
                }
                if frames.is_empty() {
                    return Err(WizardError::NoSuccessor(key));
                }
                if registered > 1 {
                    warn!(step = %step, registered, "step registered more than one successor");
                }
                for module in installs {
                    self.registry.install(module);
                }
                self.registry.get_mut(step.module())?.on_forward(&state);
                self.states.insert(key, state);
                self.stack.extend(frames);
            }
            Err(fault) => {
                if frame.is_recovery() {
                    return Err(WizardError::RecoveryFailed {
                        step: key,
                        fault: format!("{fault:?}"),
                    });
                }
                let text = format!("{fault:?}");
                warn!(step = %step, error = %fault, "step failed, routing to recovery");
                state.mark_errored(text.clone());
                self.states.insert(key, state);
                self.dispatch_error(step, &text)?;
            }
        }
        self.persist(None);
        Ok(Flow::Continue)
    }

    /// Pushes the recovery frame the failed step's module registers.
    fn dispatch_error(&mut self, failed: &StepId, fault: &str) -> Result<(), WizardError> {
        let mut next = CallNext::new();
        self.registry
            .get_mut(failed.module())?
            .on_error(failed, fault, &mut next);
        let frames: Vec<Frame> = next
            .into_frames()
            .into_iter()
            .map(|frame| match frame {
                Frame::Step(id) => Frame::Recovery(id),
                other => other,
            })
            .collect();
        if frames.is_empty() {
            return Err(WizardError::NoSuccessor(failed.key()));
        }
        self.stack.extend(frames);
        Ok(())
    }

    /// Unwinds to the most recent step that showed the user a screen.
    ///
    /// Steps that never interacted are skipped and their state discarded
    /// along the way, so Back never lands on an invisible step.
    fn unwind(&mut self, current: &str) -> Flow {
        self.stack.pop();
        self.states.remove(current);
        loop {
            let Some(top) = self.stack.last() else {
                return Flow::Stop(RunOutcome::BackedOut);
            };
            let Some(step) = top.step_id().cloned() else {
                self.stack.pop();
                continue;
            };
            let removed = self.states.remove(&step.key());
            let interacted = removed.as_ref().map(StepState::interacted).unwrap_or(false);
            if let Some(state) = &removed {
                match self.registry.get_mut(step.module()) {
                    Ok(module) => module.on_back(state),
                    Err(err) => warn!(step = %step, error = %err, "skipping on_back"),
                }
            }
            if interacted {
                debug!(step = %step, "back lands here");
                return Flow::Continue;
            }
            debug!(step = %step, "skipping step without interaction");
            self.stack.pop();
        }
    }

    fn persist(&self, error: Option<String>) {
        let document = ResumeDocument {
            state: self.states.clone(),
            error,
            other_info: self.registry.other_info(),
            output: Some(self.session.output_snapshot()),
            saved_at: Some(Utc::now()),
            session_id: Some(self.session_id),
        };
        if let Err(err) = self.store.save(&document) {
            warn!(error = %err, "failed to persist discovery state");
        }
    }
}

fn panic_text(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

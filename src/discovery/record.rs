//! Bookkeeping every discovery module shares, plus the two escape steps
//! (error recovery and manual "Other" entry) each module exposes.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::DiscoveryContext;
use crate::errors::WizardError;
use crate::prompt::{PromptOptions, PromptResult};
use crate::wizard::{
    CallNext, MissingInfo, Module, ModuleId, StepContext, StepId, StepKind, StepOutcome,
    StepState,
};

use super::Discovery;

pub const MISSING_INFO: &str = "missing_info";
pub const OTHER_TEXT: &str = "other_text";
const ERROR: &str = "error";
const ERROR_STEP: &str = "error_method";

pub const OTHER_TITLE: &str = "Other Information";
pub const OTHER_PROMPT: &str = "Please use the field below to describe your desired configuration";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub step: String,
    pub fault: String,
}

/// Per-instance record: tracked facts, the escape record persisted as
/// `other_info`, and the last routed failure.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    id: ModuleId,
    missing: MissingInfo,
    other_info: Map<String, Value>,
    failure: Option<Failure>,
}

impl ModuleRecord {
    pub fn new(id: &str, tracked: &'static [&'static str]) -> Self {
        Self {
            id: ModuleId::new(id),
            missing: MissingInfo::new(tracked),
            other_info: Map::new(),
            failure: None,
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn step<K: StepKind>(&self, kind: K) -> StepId {
        self.id.step(kind)
    }

    pub fn missing(&self) -> &MissingInfo {
        &self.missing
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn info(&self, key: &str) -> Option<&Value> {
        self.other_info.get(key)
    }

    pub fn info_str(&self, key: &str) -> Option<&str> {
        self.other_info.get(key).and_then(Value::as_str)
    }

    pub fn set_info(&mut self, key: &str, value: impl Into<Value>) {
        self.other_info.insert(key.to_string(), value.into());
    }

    pub fn remove_info(&mut self, key: &str) -> Option<Value> {
        self.other_info.remove(key)
    }

    /// Whether this module fell back to manual configuration.
    pub fn has_gaps(&self) -> bool {
        self.other_info.contains_key(MISSING_INFO)
    }

    pub fn other_info(&self) -> Option<Value> {
        if self.other_info.is_empty() {
            None
        } else {
            Some(Value::Object(self.other_info.clone()))
        }
    }

    fn record_failure(&mut self, failed: &StepId, fault: &str) {
        self.failure = Some(Failure {
            step: failed.key(),
            fault: fault.to_string(),
        });
    }
}

/// A discovery module: a step enum, a record, and the step bodies.
///
/// Every implementor is a [`Module`] over [`Discovery`] through the blanket
/// impl below, which supplies the lifecycle hooks from the record.
#[async_trait]
pub trait DiscoveryModule: Send {
    type Step: StepKind;

    /// Step registered by `on_error`.
    const PROMPT_ERROR: Self::Step;

    fn record(&self) -> &ModuleRecord;

    fn record_mut(&mut self) -> &mut ModuleRecord;

    async fn run(
        &mut self,
        step: Self::Step,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome>;

    /// Undoes side effects a step had outside its state when back
    /// navigation discards it.
    fn unwind(&mut self, _state: &StepState) {}
}

#[async_trait]
impl<T> Module<Discovery> for T
where
    T: DiscoveryModule + 'static,
{
    fn id(&self) -> &ModuleId {
        self.record().id()
    }

    async fn run_step(
        &mut self,
        step: &StepId,
        cx: &mut StepContext<'_, Discovery>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        let Some(kind) = step.kind::<T::Step>() else {
            return Err(WizardError::UnknownStep {
                module: step.module().to_string(),
                step: step.step_name().to_string(),
            }
            .into());
        };
        self.run(kind, cx, state).await
    }

    fn on_forward(&mut self, state: &StepState) {
        self.record_mut().missing.forward(state);
    }

    fn on_back(&mut self, state: &StepState) {
        self.record_mut().missing.back(state);
        self.unwind(state);
    }

    fn on_error(&mut self, failed: &StepId, fault: &str, next: &mut CallNext) {
        self.record_mut().record_failure(failed, fault);
        next.call_next(self.record().step(T::PROMPT_ERROR));
    }

    fn other_info(&self) -> Option<Value> {
        self.record().other_info()
    }
}

/// Text of a module's error screen.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryCopy {
    pub title: &'static str,
    pub lines: &'static [&'static str],
}

impl RecoveryCopy {
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.to_string()).collect()
    }
}

/// How an escape step wants the flow to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Back,
    Proceed,
}

/// Shows the error screen for the module's last failure. On `Proceed` the
/// caller degrades its output and moves on.
pub async fn prompt_error(
    record: &mut ModuleRecord,
    cx: &mut DiscoveryContext<'_>,
    state: &mut StepState,
    copy: &RecoveryCopy,
) -> anyhow::Result<Resolution> {
    let missing = record.missing().missing();
    record.set_info(MISSING_INFO, missing);
    if let Some(failure) = record.failure().cloned() {
        record.set_info(ERROR, failure.fault);
        record.set_info(ERROR_STEP, failure.step);
    }

    if state.is_empty() {
        state.set_interacted(false);
        let answer = cx
            .prompts
            .acknowledge(copy.title, &copy.lines(), PromptOptions::default())
            .await?;
        state.set_interacted(true);
        if answer == PromptResult::Back {
            record.remove_info(MISSING_INFO);
            record.remove_info(ERROR);
            record.remove_info(ERROR_STEP);
            return Ok(Resolution::Back);
        }
    }
    Ok(Resolution::Proceed)
}

/// Collects a free-text description of what discovery could not determine.
/// The text is kept on the record so backing into this screen pre-fills it.
pub async fn prompt_other(
    record: &mut ModuleRecord,
    cx: &mut DiscoveryContext<'_>,
    state: &mut StepState,
) -> anyhow::Result<Resolution> {
    if state.is_empty() {
        state.set_interacted(false);
        let initial = record.info_str(OTHER_TEXT).unwrap_or_default().to_string();
        let answer = cx
            .prompts
            .multiline_text(OTHER_TITLE, OTHER_PROMPT, &initial, PromptOptions::default())
            .await?;
        state.set_interacted(true);
        let text = match answer {
            PromptResult::Back => {
                record.remove_info(OTHER_TEXT);
                record.remove_info(MISSING_INFO);
                return Ok(Resolution::Back);
            }
            PromptResult::Value(text) => text,
            PromptResult::Other => String::new(),
        };
        let missing = record.missing().missing();
        state.insert(MISSING_INFO, missing);
        state.insert(OTHER_TEXT, text);
    }

    record.set_info(
        MISSING_INFO,
        state.get(MISSING_INFO).cloned().unwrap_or_else(|| json!([])),
    );
    record.set_info(OTHER_TEXT, state.get_str(OTHER_TEXT).unwrap_or_default());
    Ok(Resolution::Proceed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_reports_no_other_info() {
        let mut record = ModuleRecord::new("metrics", &["perf_metric"]);
        assert!(record.other_info().is_none());
        assert!(!record.has_gaps());

        record.set_info(MISSING_INFO, vec!["perf_metric".to_string()]);
        assert!(record.has_gaps());
        assert_eq!(
            record.other_info(),
            Some(json!({ "missing_info": ["perf_metric"] }))
        );
    }

    #[test]
    fn failures_are_keyed_by_step() {
        #[derive(Debug, Clone, Copy)]
        struct Only;
        impl StepKind for Only {
            fn name(self) -> &'static str {
                "select_metrics"
            }
            fn from_name(_: &str) -> Option<Self> {
                Some(Only)
            }
        }

        let mut record = ModuleRecord::new("metrics", &[]);
        let failed = record.step(Only);
        record.record_failure(&failed, "connection refused");
        assert_eq!(
            record.failure(),
            Some(&Failure {
                step: "metrics::select_metrics".into(),
                fault: "connection refused".into(),
            })
        );
    }
}

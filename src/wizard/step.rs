//! Step identities, step state, and the tagged outcome a step returns.

use std::collections::BTreeMap;
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

pub const INTERACTED: &str = "interacted";
pub const ERRORED: &str = "errored";
pub const ERROR: &str = "error";
pub const OTHER_SELECTED: &str = "other_selected";

/// Name of a module instance inside the registry, e.g. `builder` or `metrics`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convenience for building a [`StepId`] owned by this module.
    pub fn step<K: StepKind>(&self, kind: K) -> StepId {
        StepId::new(self, kind)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of steps a module knows how to run.
///
/// Implemented by a plain enum per module. `name` must be unique within the
/// enum and must never change between releases: it is half of the key under
/// which step state is persisted.
pub trait StepKind: Copy + fmt::Debug + Send + Sync + 'static {
    fn name(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self>;
}

/// Stable identity of one step of one module instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepId {
    module: ModuleId,
    step: &'static str,
}

impl StepId {
    pub fn new<K: StepKind>(module: &ModuleId, kind: K) -> Self {
        Self {
            module: module.clone(),
            step: kind.name(),
        }
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn step_name(&self) -> &'static str {
        self.step
    }

    /// Resolves the step name back into the owning module's enum.
    pub fn kind<K: StepKind>(&self) -> Option<K> {
        K::from_name(self.step)
    }

    /// Key used in the persisted state map.
    pub fn key(&self) -> String {
        format!("{}::{}", self.module, self.step)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.step)
    }
}

/// One entry of the run stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Step(StepId),
    /// A step registered by a module's `on_error` hook. Faults raised while
    /// running it are not recovered again.
    Recovery(StepId),
    /// Sentinel on top of the stack once the wizard is done.
    Terminal,
}

impl Frame {
    pub fn step_id(&self) -> Option<&StepId> {
        match self {
            Frame::Step(id) | Frame::Recovery(id) => Some(id),
            Frame::Terminal => None,
        }
    }

    pub fn is_recovery(&self) -> bool {
        matches!(self, Frame::Recovery(_))
    }
}

/// What a step asks the navigator to do once it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Commit the state and continue with the registered successor.
    Forward,
    /// Discard this frame and unwind to the previous screen the user saw.
    Back,
    /// Commit the state and end the run successfully.
    Finish,
}

/// Result map produced by one step. Persisted verbatim in the resume file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepState(BTreeMap<String, Value>);

impl StepState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Deserializes a structured value stored under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn insert_as<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.0.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether the step showed the user a screen. Missing counts as `false`.
    pub fn interacted(&self) -> bool {
        self.get_bool(INTERACTED)
    }

    pub fn set_interacted(&mut self, interacted: bool) {
        self.insert(INTERACTED, interacted);
    }

    pub fn errored(&self) -> bool {
        self.get_bool(ERRORED)
    }

    pub fn error_text(&self) -> Option<&str> {
        self.get_str(ERROR)
    }

    pub fn mark_errored(&mut self, fault: impl Into<String>) {
        self.insert(ERRORED, true);
        self.insert(ERROR, fault.into());
    }

    pub fn other_selected(&self) -> bool {
        self.get_bool(OTHER_SELECTED)
    }

    pub fn select_other(&mut self) {
        self.insert(OTHER_SELECTED, true);
    }
}

impl FromIterator<(String, Value)> for StepState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Sample {
        First,
        Second,
    }

    impl StepKind for Sample {
        fn name(self) -> &'static str {
            match self {
                Sample::First => "first",
                Sample::Second => "second",
            }
        }

        fn from_name(name: &str) -> Option<Self> {
            match name {
                "first" => Some(Sample::First),
                "second" => Some(Sample::Second),
                _ => None,
            }
        }
    }

    #[test]
    fn step_key_combines_module_and_step() {
        let module = ModuleId::new("metrics");
        let id = module.step(Sample::Second);
        assert_eq!(id.key(), "metrics::second");
        assert_eq!(id.kind::<Sample>(), Some(Sample::Second));
        assert_eq!(id, StepId::new(&ModuleId::new("metrics"), Sample::Second));
        assert_ne!(id, module.step(Sample::First));
    }

    #[test]
    fn missing_interacted_reads_as_false() {
        let mut state = StepState::new();
        assert!(!state.interacted());
        state.set_interacted(true);
        assert!(state.interacted());
    }

    #[test]
    fn mark_errored_sets_both_sentinels() {
        let mut state = StepState::new();
        state.mark_errored("boom");
        assert!(state.errored());
        assert_eq!(state.error_text(), Some("boom"));
    }

    #[test]
    fn state_serializes_as_plain_map() {
        let mut state = StepState::new();
        state.set_interacted(false);
        state.insert("endpoint", "x");
        let yaml = serde_yaml::to_string(&state).unwrap();
        let back: StepState = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.get_str("endpoint"), Some("x"));
        assert!(!back.interacted());
        assert!(yaml.contains("endpoint: x"));
    }

    #[test]
    fn structured_values_round_trip_through_state() {
        let mut state = StepState::new();
        state
            .insert_as("metrics", &vec!["a".to_string(), "b".to_string()])
            .unwrap();
        let metrics: Vec<String> = state.get_as("metrics").unwrap();
        assert_eq!(metrics, vec!["a", "b"]);
    }
}

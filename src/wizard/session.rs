use serde_json::{json, Map, Value};

/// Aggregated state owned by the navigator for the duration of one run.
///
/// The output documents are opaque to the engine: modules write into them and
/// the navigator only snapshots them and hands them to emission. `shared`
/// carries whatever the concrete flow needs to pass between modules.
#[derive(Debug)]
pub struct Session<D> {
    pub servo_config: Map<String, Value>,
    pub override_doc: Value,
    pub messages: Vec<String>,
    pub shared: D,
}

impl<D> Session<D> {
    pub fn new(shared: D) -> Self {
        Self {
            servo_config: Map::new(),
            override_doc: Value::Object(Map::new()),
            messages: Vec::new(),
            shared,
        }
    }

    /// Replaces every pending user-facing message with `messages`.
    pub fn replace_messages<I, S>(&mut self, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages = messages.into_iter().map(Into::into).collect();
    }

    /// Appends `message` unless an identical one is already queued.
    pub fn push_message_once(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.messages.contains(&message) {
            self.messages.push(message);
        }
    }

    /// Mutable access to a nested object of the override document, creating
    /// intermediate objects as needed.
    pub fn override_section(&mut self, path: &[&str]) -> &mut Map<String, Value> {
        let mut cursor = &mut self.override_doc;
        for segment in path {
            cursor = as_object(cursor)
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        as_object(cursor)
    }

    /// Output documents as written to the resume file.
    pub fn output_snapshot(&self) -> Value {
        json!({
            "servo_config": Value::Object(self.servo_config.clone()),
            "override": self.override_doc.clone(),
        })
    }
}

fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was coerced to an object"),
    }
}

use std::borrow::Cow;

use indexmap::IndexMap;
use indexmap::map::{IntoIter, Iter};

use log::warn;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Keys owned by the envelope itself.
const RESERVED_KEYS: [&str; 3] = ["type", "op", "id"];

/// Free-form parameters attached to a [`Command`].
///
/// Parameters are kept in insertion order and flattened into the top-level
/// object of the encoded command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandParameters(IndexMap<String, Value>);

impl Default for CommandParameters {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for CommandParameters {
    type Item = (String, Value);
    type IntoIter = IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a CommandParameters {
    type Item = (&'a String, &'a Value);
    type IntoIter = Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl CommandParameters {
    /// Creates an empty [`CommandParameters`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Adds a raw JSON value.
    #[inline]
    pub fn value(&mut self, name: impl Into<Cow<'static, str>>, value: Value) -> &mut Self {
        self.0.insert(name.into().into_owned(), value);
        self
    }

    /// Adds a [`bool`] value.
    #[inline]
    pub fn bool(&mut self, name: impl Into<Cow<'static, str>>, value: bool) -> &mut Self {
        self.value(name, Value::Bool(value))
    }

    /// Adds an [`u64`] value.
    #[inline]
    pub fn u64(&mut self, name: impl Into<Cow<'static, str>>, value: u64) -> &mut Self {
        self.value(name, Value::from(value))
    }

    /// Adds an [`i64`] value.
    #[inline]
    pub fn i64(&mut self, name: impl Into<Cow<'static, str>>, value: i64) -> &mut Self {
        self.value(name, Value::from(value))
    }

    /// Adds an [`f64`] value.
    ///
    /// Non-finite numbers are encoded as `null`.
    #[inline]
    pub fn f64(&mut self, name: impl Into<Cow<'static, str>>, value: f64) -> &mut Self {
        self.value(name, Value::from(value))
    }

    /// Adds a string value.
    #[inline]
    pub fn str(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.value(name, Value::String(value.into()))
    }

    /// Returns the value associated with the given name.
    #[must_use]
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Checks whether there are no parameters.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of parameters.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns an iterator over the parameters.
    #[inline]
    pub fn iter(&self) -> Iter<'_, String, Value> {
        self.0.iter()
    }

    fn strip_reserved(mut self) -> Self {
        for key in RESERVED_KEYS {
            if self.0.shift_remove(key).is_some() {
                warn!("Dropping the `{key}` parameter: it is reserved by the command envelope");
            }
        }
        self
    }
}

/// A command sent to a device agent.
///
/// Once encoded, a command is a flat JSON object:
///
/// ```json
/// { "type": "wifi", "op": "connect", "id": 42, "ssid": "lab" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Subsystem targeted by the command, e.g. `wifi`, `frida`, `system`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Operation name, e.g. `connect`.
    pub op: String,
    /// Correlation identifier.
    pub id: u32,
    /// Additional parameters merged at the top level.
    #[serde(flatten)]
    pub parameters: CommandParameters,
}

impl Command {
    /// Creates a [`Command`] without parameters.
    #[must_use]
    #[inline]
    pub fn new(kind: impl Into<String>, op: impl Into<String>, id: u32) -> Self {
        Self {
            kind: kind.into(),
            op: op.into(),
            id,
            parameters: CommandParameters::new(),
        }
    }

    /// Attaches [`CommandParameters`] to a [`Command`].
    ///
    /// Parameters named `type`, `op`, or `id` are discarded because they
    /// would overwrite the envelope fields.
    #[must_use]
    #[inline]
    pub fn parameters(mut self, parameters: CommandParameters) -> Self {
        self.parameters = parameters.strip_reserved();
        self
    }

    /// Encodes a [`Command`] as a JSON string.
    ///
    /// # Errors
    ///
    /// Fails only if a parameter value cannot be represented as JSON.
    #[inline]
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a [`Command`] from a JSON string.
    ///
    /// # Errors
    ///
    /// Fails when the input is not a JSON object containing `type`, `op`,
    /// and a numeric `id`.
    #[inline]
    pub fn decode(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{deserialize, serialize};

    use super::{Command, CommandParameters};

    #[test]
    fn encode_without_parameters() {
        let command = Command::new("system", "lock", 7);

        assert_eq!(
            serialize(&command),
            json!({
                "type": "system",
                "op": "lock",
                "id": 7,
            })
        );
    }

    #[test]
    fn parameters_are_flattened() {
        let mut parameters = CommandParameters::new();
        parameters
            .str("ssid", "lab")
            .bool("hidden", false)
            .u64("channel", 11);

        let command = Command::new("wifi", "connect", 42).parameters(parameters);

        let encoded = command.encode().unwrap();

        // Insertion order is preserved after the envelope fields.
        assert_eq!(
            encoded,
            r#"{"type":"wifi","op":"connect","id":42,"ssid":"lab","hidden":false,"channel":11}"#
        );
        assert_eq!(Command::decode(&encoded).unwrap(), command);
    }

    #[test]
    fn reserved_parameters_are_dropped() {
        let mut parameters = CommandParameters::new();
        parameters
            .u64("id", 999)
            .str("type", "other")
            .str("op", "other")
            .str("script", "hook.js");

        let command = Command::new("frida", "run-frida", 3).parameters(parameters);

        assert_eq!(command.parameters.len(), 1);
        assert_eq!(
            serialize(&command),
            json!({
                "type": "frida",
                "op": "run-frida",
                "id": 3,
                "script": "hook.js",
            })
        );
    }

    #[test]
    fn decode_collects_unknown_fields() {
        let command: Command = deserialize(json!({
            "type": "app",
            "op": "run",
            "id": 0,
            "bundleId": "com.example.cafe",
        }));

        assert_eq!(command.kind, "app");
        assert_eq!(command.id, 0);
        assert_eq!(
            command.parameters.get("bundleId"),
            Some(&json!("com.example.cafe"))
        );
    }

    #[test]
    fn decode_rejects_missing_id() {
        assert!(Command::decode(r#"{"type":"app","op":"run"}"#).is_err());
    }
}

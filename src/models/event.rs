use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Block id used for deltas whose target block could not be determined
pub const UNKNOWN_BLOCK_ID: &str = "unknown";

/// Intermediate block protocol event, as emitted by the model inside its output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum BlockEvent {
    #[serde(rename = "block_start")]
    Start { block_id: String, block_type: String },

    #[serde(rename = "block_delta")]
    Delta {
        block_id: String,
        path: String,
        value: String,
    },

    #[serde(rename = "block_end")]
    End {
        block_id: String,
        #[serde(default)]
        partial: bool,
    },
}

impl BlockEvent {
    pub fn start(block_id: impl Into<String>, block_type: impl Into<String>) -> Self {
        BlockEvent::Start {
            block_id: block_id.into(),
            block_type: block_type.into(),
        }
    }

    pub fn delta(
        block_id: impl Into<String>,
        path: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        BlockEvent::Delta {
            block_id: block_id.into(),
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn end(block_id: impl Into<String>, partial: bool) -> Self {
        BlockEvent::End {
            block_id: block_id.into(),
            partial,
        }
    }

    pub fn block_id(&self) -> &str {
        match self {
            BlockEvent::Start { block_id, .. }
            | BlockEvent::Delta { block_id, .. }
            | BlockEvent::End { block_id, .. } => block_id,
        }
    }

    /// Serialize into the wire object form
    pub fn to_value(&self) -> Value {
        // Plain string/bool fields only, serialization cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Short random id with a prefix, e.g. `auto-1a2b3c4d`
pub fn generate_block_id(prefix: &str) -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &simple[..8])
}

/// Render a JSON value as delta text: strings verbatim, anything else as JSON
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn field_or(obj: &serde_json::Map<String, Value>, key: &str, default: impl FnOnce() -> String) -> String {
    match obj.get(key) {
        Some(Value::Null) | None => default(),
        Some(v) => stringify(v),
    }
}

/// Normalize a decoded JSON value into a well-formed [`BlockEvent`].
///
/// Known events get their missing fields defaulted. Anything else is never
/// rejected: it becomes a delta on the [`UNKNOWN_BLOCK_ID`] block carrying the
/// original value serialized as JSON.
pub fn normalize_event(value: Value) -> BlockEvent {
    let event_type = value
        .get("event")
        .and_then(|e| e.as_str())
        .map(str::to_owned);

    if let (Some(event_type), Value::Object(obj)) = (event_type.as_deref(), &value) {
        match event_type {
            "block_start" => {
                return BlockEvent::Start {
                    block_id: field_or(obj, "block_id", || generate_block_id("auto")),
                    block_type: field_or(obj, "block_type", || "text".to_string()),
                };
            }
            "block_delta" => {
                return BlockEvent::Delta {
                    block_id: field_or(obj, "block_id", || UNKNOWN_BLOCK_ID.to_string()),
                    path: field_or(obj, "path", || "content".to_string()),
                    value: obj.get("value").map(stringify).unwrap_or_default(),
                };
            }
            "block_end" => {
                return BlockEvent::End {
                    block_id: field_or(obj, "block_id", || UNKNOWN_BLOCK_ID.to_string()),
                    partial: obj.get("partial").and_then(|p| p.as_bool()).unwrap_or(false),
                };
            }
            _ => {}
        }
    }

    tracing::debug!(raw = %value, "Unrecognized event normalized to unknown delta");
    BlockEvent::Delta {
        block_id: UNKNOWN_BLOCK_ID.to_string(),
        path: "content".to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_events_pass_through() {
        let start = normalize_event(json!({"event": "block_start", "block_id": "b1", "block_type": "table"}));
        assert_eq!(start, BlockEvent::start("b1", "table"));

        let delta = normalize_event(json!({"event": "block_delta", "block_id": "b1", "path": "rows", "value": "a|b"}));
        assert_eq!(delta, BlockEvent::delta("b1", "rows", "a|b"));

        let end = normalize_event(json!({"event": "block_end", "block_id": "b1", "partial": true}));
        assert_eq!(end, BlockEvent::end("b1", true));
    }

    #[test]
    fn test_start_defaults() {
        match normalize_event(json!({"event": "block_start"})) {
            BlockEvent::Start {
                block_id,
                block_type,
            } => {
                assert!(block_id.starts_with("auto-"));
                assert_eq!(block_id.len(), "auto-".len() + 8);
                assert_eq!(block_type, "text");
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn test_delta_and_end_defaults() {
        assert_eq!(
            normalize_event(json!({"event": "block_delta"})),
            BlockEvent::delta("unknown", "content", "")
        );
        assert_eq!(
            normalize_event(json!({"event": "block_delta", "block_id": "b", "value": 42})),
            BlockEvent::delta("b", "content", "42")
        );
        assert_eq!(
            normalize_event(json!({"event": "block_end", "block_id": "b"})),
            BlockEvent::end("b", false)
        );
    }

    #[test]
    fn test_unknown_event_preserved_as_delta() {
        let raw = json!({"event": "citation", "n": 1});
        match normalize_event(raw.clone()) {
            BlockEvent::Delta {
                block_id,
                path,
                value,
            } => {
                assert_eq!(block_id, UNKNOWN_BLOCK_ID);
                assert_eq!(path, "content");
                assert_eq!(serde_json::from_str::<Value>(&value).unwrap(), raw);
            }
            other => panic!("expected delta, got {:?}", other),
        }

        // Non-object values take the same route
        assert_eq!(
            normalize_event(json!([1, 2])),
            BlockEvent::delta("unknown", "content", "[1,2]")
        );
    }

    #[test]
    fn test_wire_form() {
        let value = BlockEvent::end("b9", true).to_value();
        assert_eq!(value, json!({"event": "block_end", "block_id": "b9", "partial": true}));

        let parsed: BlockEvent =
            serde_json::from_value(json!({"event": "block_end", "block_id": "b9"})).unwrap();
        assert_eq!(parsed, BlockEvent::end("b9", false));
    }
}

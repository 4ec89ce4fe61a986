//! The wire message shape (§6): one JSON object per line, tagged by `type`.
//! Kept as a hand-rolled `RawMessage` + `match` rather than a `#[serde(tag)]`
//! enum so a missing required field per variant reports as a precise
//! `MalformedMessage` instead of serde's generic "data did not match any
//! variant" message.

use serde::Deserialize;
use serde_json::Value;

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub enum Message {
    Schema {
        stream: String,
        schema: Value,
        key_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: Value,
        version: Option<i64>,
        sequence: Option<i64>,
        time_extracted: Option<String>,
    },
    ActivateVersion { stream: String, version: i64 },
    State { value: Value },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    stream: Option<String>,
    schema: Option<Value>,
    #[serde(default)]
    key_properties: Vec<String>,
    record: Option<Value>,
    version: Option<i64>,
    sequence: Option<i64>,
    time_extracted: Option<String>,
    value: Option<Value>,
}

impl Message {
    pub fn parse(line: &str) -> Result<Self, EngineError> {
        let raw: RawMessage = serde_json::from_str(line)
            .map_err(|e| EngineError::malformed_message(format!("invalid JSON: {e}")))?;

        match raw.kind.as_str() {
            "SCHEMA" => Ok(Message::Schema {
                stream: require(raw.stream, "SCHEMA", "stream")?,
                schema: require(raw.schema, "SCHEMA", "schema")?,
                key_properties: raw.key_properties,
            }),
            "RECORD" => Ok(Message::Record {
                stream: require(raw.stream, "RECORD", "stream")?,
                record: require(raw.record, "RECORD", "record")?,
                version: raw.version,
                sequence: raw.sequence,
                time_extracted: raw.time_extracted,
            }),
            "ACTIVATE_VERSION" => Ok(Message::ActivateVersion {
                stream: require(raw.stream, "ACTIVATE_VERSION", "stream")?,
                version: require(raw.version, "ACTIVATE_VERSION", "version")?,
            }),
            "STATE" => Ok(Message::State {
                value: require(raw.value, "STATE", "value")?,
            }),
            other => Err(EngineError::unknown_message_type(format!(
                "'{other}' is not one of SCHEMA, RECORD, ACTIVATE_VERSION, STATE"
            ))),
        }
    }
}

fn require<T>(field: Option<T>, kind: &str, name: &str) -> Result<T, EngineError> {
    field.ok_or_else(|| EngineError::malformed_message(format!("{kind} message is missing '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_schema_message() {
        let msg = Message::parse(
            r#"{"type": "SCHEMA", "stream": "cats", "schema": {"type": "object"}, "key_properties": ["id"]}"#,
        )
        .unwrap();
        match msg {
            Message::Schema { stream, key_properties, .. } => {
                assert_eq!(stream, "cats");
                assert_eq!(key_properties, vec!["id".to_string()]);
            }
            other => panic!("expected Schema, got {other:?}"),
        }
    }

    #[test]
    fn parses_a_record_message_with_optional_fields_absent() {
        let msg = Message::parse(r#"{"type": "RECORD", "stream": "cats", "record": {"id": 1}}"#).unwrap();
        match msg {
            Message::Record { version, sequence, time_extracted, .. } => {
                assert!(version.is_none());
                assert!(sequence.is_none());
                assert!(time_extracted.is_none());
            }
            other => panic!("expected Record, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = Message::parse(r#"{"type": "RECORD", "stream": "cats"}"#).unwrap_err();
        assert!(matches!(err, EngineError::MalformedMessage { .. }));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Message::parse(r#"{"type": "BATCH"}"#).unwrap_err();
        assert!(matches!(err, EngineError::UnknownMessageType { .. }));
    }
}

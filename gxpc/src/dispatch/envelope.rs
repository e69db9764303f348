//! Wire schema of agent messages
//!
//! Inbound envelopes look like `{"type": "send"|"log"|..., "payload": ...}`.
//! A `send` payload carries its own `{"type": ..., "payload": ...}` pair and
//! may arrive JSON-encoded as a string, since the agent calls
//! `send(JSON.stringify(..))`.

use serde_json::Value;

use crate::domain::DispatchError;
use crate::offsets::NewOffset;
use crate::printer::PrintRecord;

/// Outer envelope kind; it alone decides how `payload` is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Send,
    Log,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub payload: Value,
    raw: Value,
}

impl Envelope {
    pub fn from_raw(raw: Value) -> Self {
        let kind = match raw.get("type").and_then(Value::as_str) {
            Some("send") => EnvelopeKind::Send,
            Some("log") => EnvelopeKind::Log,
            _ => EnvelopeKind::Other,
        };
        let payload = raw.get("payload").cloned().unwrap_or(Value::Null);
        Self { kind, payload, raw }
    }

    /// The envelope exactly as received
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// Decoded `send` payload
#[derive(Debug, Clone, PartialEq)]
pub enum SendMessage {
    /// `print`: one intercepted XPC message
    Print(PrintRecord),
    /// `jlutil`: base64 data for the external decoder
    ToolInvocation { data: String },
    /// `newOffset`: offsets the agent resolved from symbols
    OffsetUpdate(NewOffset),
    /// Any other type; logged, never rejected
    Unknown { kind: String, payload: Value },
}

impl SendMessage {
    pub fn decode(payload: &Value) -> Result<Self, DispatchError> {
        let parsed;
        let payload = match payload {
            Value::String(text) => {
                parsed = serde_json::from_str::<Value>(text)
                    .map_err(|_| DispatchError::NotAnObject(text.clone()))?;
                &parsed
            }
            other => other,
        };
        let Value::Object(fields) = payload else {
            return Err(DispatchError::NotAnObject(payload.to_string()));
        };
        let kind = fields.get("type").and_then(Value::as_str).ok_or(DispatchError::MissingType)?;
        let inner = fields.get("payload").cloned().unwrap_or(Value::Null);

        match kind {
            "print" => serde_json::from_value(inner)
                .map(SendMessage::Print)
                .map_err(|source| DispatchError::Malformed { kind: "print", source }),
            "jlutil" => serde_json::from_value(inner)
                .map(|data| SendMessage::ToolInvocation { data })
                .map_err(|source| DispatchError::Malformed { kind: "jlutil", source }),
            "newOffset" => {
                // the agent puts the fields beside `type`, not under `payload`
                let source = if inner.is_object() { inner } else { payload.clone() };
                serde_json::from_value(source)
                    .map(SendMessage::OffsetUpdate)
                    .map_err(|source| DispatchError::Malformed { kind: "newOffset", source })
            }
            other => Ok(SendMessage::Unknown { kind: other.to_string(), payload: inner }),
        }
    }
}

/// Escape `text` for embedding inside a JSON string literal
pub fn escape_json_text(text: &str) -> String {
    let quoted = Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Outbound reply carrying the decoder output (already escaped)
pub fn tool_reply(escaped: &str) -> String {
    format!(r#"{{"type":"jlutil","payload":"{escaped}"}}"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_kinds() {
        assert_eq!(Envelope::from_raw(json!({"type": "send", "payload": {}})).kind, EnvelopeKind::Send);
        assert_eq!(Envelope::from_raw(json!({"type": "log", "payload": "hi"})).kind, EnvelopeKind::Log);
        assert_eq!(Envelope::from_raw(json!({"type": "error"})).kind, EnvelopeKind::Other);
        assert_eq!(Envelope::from_raw(json!("garbage")).kind, EnvelopeKind::Other);
    }

    #[test]
    fn test_decode_stringified_print() {
        let text = json!({"type": "print", "payload": {"connName": "com.apple.xpc"}}).to_string();
        let message = SendMessage::decode(&Value::String(text)).unwrap();
        assert!(matches!(message, SendMessage::Print(r) if r.conn_name == "com.apple.xpc"));
    }

    #[test]
    fn test_decode_offset_fields_beside_type() {
        let payload = json!({
            "type": "newOffset",
            "machine": "iPhone14,7",
            "version": "20B110",
            "plistCreate": "0xb1c00",
            "callEvent": "0x11c00"
        });
        let SendMessage::OffsetUpdate(update) = SendMessage::decode(&payload).unwrap() else {
            panic!("expected offset update");
        };
        assert_eq!(update.version, "20B110");
        assert_eq!(update.call_event, "0x11c00");
    }

    #[test]
    fn test_decode_unknown_type() {
        let message = SendMessage::decode(&json!({"type": "hello", "payload": 1})).unwrap();
        assert_eq!(message, SendMessage::Unknown { kind: "hello".to_string(), payload: json!(1) });
    }

    #[test]
    fn test_decode_errors_are_values() {
        assert!(matches!(SendMessage::decode(&json!(5)), Err(DispatchError::NotAnObject(_))));
        assert!(matches!(SendMessage::decode(&json!({})), Err(DispatchError::MissingType)));
        assert!(matches!(
            SendMessage::decode(&json!({"type": "print", "payload": {"pid": 1}})),
            Err(DispatchError::Malformed { kind: "print", .. })
        ));
        assert!(matches!(
            SendMessage::decode(&json!({"type": "jlutil", "payload": 3})),
            Err(DispatchError::Malformed { kind: "jlutil", .. })
        ));
    }

    #[test]
    fn test_tool_reply_round_trips() {
        let output = "line \"one\"\n\ttwo\\";
        let reply: Value = serde_json::from_str(&tool_reply(&escape_json_text(output))).unwrap();
        assert_eq!(reply["type"], "jlutil");
        assert_eq!(reply["payload"], output);
    }
}

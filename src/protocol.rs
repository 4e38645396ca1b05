use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Discriminator for operator input sent to the agent
pub const TERMINAL_INPUT: &str = "terminal_input";
/// Discriminator for terminal buffers sent by the agent
pub const TERMINAL_OUTPUT: &str = "terminal_output";

/// Every frame on the session socket, in either direction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Message type (e.g., "terminal_input", "terminal_output")
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("{kind} payload is missing string field '{field}'")]
    MissingField { kind: String, field: &'static str },
}

/// Message produced by the encoder for the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Literal text, newline-terminated by the encoder
    InputText { content: String },
    /// A named key with its modifier set
    InputKey { key: String, modifiers: Vec<String> },
}

#[derive(Serialize)]
#[serde(untagged)]
enum InputPayload<'a> {
    Text {
        content: &'a str,
    },
    Key {
        key: &'a str,
        modifiers: &'a [String],
        action: &'static str,
    },
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: InputPayload<'a>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self::InputText {
            content: content.into(),
        }
    }

    pub fn key(key: impl Into<String>, modifiers: Vec<String>) -> Self {
        Self::InputKey {
            key: key.into(),
            modifiers,
        }
    }

    /// Serialize to the JSON text frame sent on the socket
    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        let payload = match self {
            OutboundMessage::InputText { content } => InputPayload::Text { content },
            OutboundMessage::InputKey { key, modifiers } => InputPayload::Key {
                key,
                modifiers,
                action: "key",
            },
        };
        let frame = OutboundFrame {
            kind: TERMINAL_INPUT,
            payload,
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

/// Message received from the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// The complete current terminal buffer
    Output { content: String },
}

/// Decode a text frame from the agent.
///
/// Returns `Ok(None)` for well-formed frames of a type this client does not
/// know about, so newer agents can add message kinds without breaking it.
pub fn decode_inbound(text: &str) -> Result<Option<InboundMessage>, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    match envelope.kind.as_str() {
        TERMINAL_OUTPUT => {
            let content = envelope
                .payload
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::MissingField {
                    kind: envelope.kind.clone(),
                    field: "content",
                })?;
            Ok(Some(InboundMessage::Output {
                content: content.to_string(),
            }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_json(message: &OutboundMessage) -> Value {
        serde_json::from_str(&message.to_wire().unwrap()).unwrap()
    }

    #[test]
    fn text_input_wire_shape() {
        let msg = OutboundMessage::text("ls -la\n");
        assert_eq!(
            as_json(&msg),
            json!({"type": "terminal_input", "payload": {"content": "ls -la\n"}})
        );
    }

    #[test]
    fn key_input_wire_shape() {
        let msg = OutboundMessage::key("c", vec!["ctrl".to_string()]);
        assert_eq!(
            as_json(&msg),
            json!({
                "type": "terminal_input",
                "payload": {"key": "c", "modifiers": ["ctrl"], "action": "key"}
            })
        );
    }

    #[test]
    fn key_input_without_modifiers_sends_empty_list() {
        let msg = OutboundMessage::key("Enter", Vec::new());
        assert_eq!(as_json(&msg)["payload"]["modifiers"], json!([]));
    }

    #[test]
    fn decodes_terminal_output() {
        let frame = r#"{"type":"terminal_output","payload":{"content":"$ \u001b[32mok\u001b[0m"}}"#;
        let decoded = decode_inbound(frame).unwrap();
        assert_eq!(
            decoded,
            Some(InboundMessage::Output {
                content: "$ \x1b[32mok\x1b[0m".to_string()
            })
        );
    }

    #[test]
    fn unknown_type_is_ignored() {
        let frame = r#"{"type":"agent_status","payload":{"online":true}}"#;
        assert_eq!(decode_inbound(frame).unwrap(), None);
    }

    #[test]
    fn frame_without_payload_of_unknown_type_is_ignored() {
        assert_eq!(decode_inbound(r#"{"type":"heartbeat"}"#).unwrap(), None);
    }

    #[test]
    fn output_without_content_is_malformed() {
        let err = decode_inbound(r#"{"type":"terminal_output","payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { field: "content", .. }));
    }

    #[test]
    fn output_with_non_string_content_is_malformed() {
        let frame = r#"{"type":"terminal_output","payload":{"content":42}}"#;
        assert!(decode_inbound(frame).is_err());
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            decode_inbound("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }
}

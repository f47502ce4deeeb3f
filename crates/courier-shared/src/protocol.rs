//! JSON-RPC wire protocol spoken with the messaging daemon.
//!
//! Every line the daemon prints is either a response to one of our requests
//! (it carries a non-null `id`) or a notification carrying an envelope. This
//! module is the only place that looks at untyped JSON: [`classify_line`]
//! turns a line into an [`Inbound`] value and everything downstream works on
//! the typed [`Envelope`] variants.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{ATTACHMENT_PLACEHOLDER, JSONRPC_VERSION};
use crate::error::ProtocolError;
use crate::types::ConversationKey;

// ---------------------------------------------------------------------------
// Requests / responses
// ---------------------------------------------------------------------------

/// An outgoing JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
    pub id: u64,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id,
        }
    }

    /// Serialize to a single newline-terminated line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One decoded line from the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to the request with the same id.
    Response {
        id: u64,
        outcome: Result<Value, RpcErrorObject>,
    },
    /// Unsolicited event.
    Notification(Envelope),
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Who an envelope came from (or, for synced sends, who it went to).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    /// Generic handle; a number or a UUID depending on daemon version.
    pub handle: Option<String>,
    pub number: Option<String>,
    pub uuid: Option<String>,
    pub name: Option<String>,
}

impl Peer {
    /// Conversation this peer's one-to-one thread lives under, or the group
    /// thread when `group_id` is set.
    pub fn conversation_key(&self, group_id: Option<&str>) -> ConversationKey {
        ConversationKey::resolve(
            group_id,
            &[self.number.as_deref(), self.handle.as_deref()],
            self.uuid.as_deref(),
        )
    }

    /// Best single string to record as the sender.
    pub fn best_handle(&self) -> Option<&str> {
        [&self.number, &self.uuid, &self.handle]
            .into_iter()
            .filter_map(|h| h.as_deref())
            .find(|h| !h.trim().is_empty())
    }
}

/// A data message received from another account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub sender: Peer,
    pub group_id: Option<String>,
    pub text: Option<String>,
    pub attachment_count: usize,
    pub timestamp: i64,
}

/// A message the local account sent from another linked device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedMessage {
    pub destination: Peer,
    pub group_id: Option<String>,
    pub text: Option<String>,
    pub attachment_count: usize,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivery,
    Read,
    Viewed,
    Unknown,
}

/// Delivery / read receipt for messages we sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub sender: Peer,
    pub kind: ReceiptKind,
    /// Timestamps (= ids) of the acknowledged messages.
    pub timestamps: Vec<i64>,
    pub when: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingAction {
    Started,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Typing {
    pub sender: Peer,
    pub action: TypingAction,
    pub group_id: Option<String>,
    pub timestamp: Option<i64>,
}

/// A classified notification.
///
/// Classification is exclusive: exactly one variant per line, chosen by the
/// priority receipt > typing > sync > message > other.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Receipt(Receipt),
    Typing(Typing),
    Sync(SyncedMessage),
    Message(IncomingMessage),
    /// Anything else, passed through untouched.
    Other(Value),
}

impl IncomingMessage {
    /// Text to store; attachment-only messages get a placeholder.
    pub fn display_text(&self) -> Option<String> {
        display_text(self.text.as_deref(), self.attachment_count)
    }
}

impl SyncedMessage {
    pub fn display_text(&self) -> Option<String> {
        display_text(self.text.as_deref(), self.attachment_count)
    }
}

fn display_text(text: Option<&str>, attachment_count: usize) -> Option<String> {
    match text {
        Some(t) if !t.is_empty() => Some(t.to_string()),
        _ if attachment_count > 0 => Some(ATTACHMENT_PLACEHOLDER.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Raw daemon shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    source: Option<String>,
    source_number: Option<String>,
    source_uuid: Option<String>,
    source_name: Option<String>,
    timestamp: Option<i64>,
    data_message: Option<RawDataMessage>,
    sync_message: Option<RawSyncMessage>,
    receipt_message: Option<RawReceiptMessage>,
    typing_message: Option<RawTypingMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDataMessage {
    timestamp: Option<i64>,
    message: Option<String>,
    group_info: Option<RawGroupInfo>,
    attachments: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroupInfo {
    group_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSyncMessage {
    sent_message: Option<RawSentMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSentMessage {
    destination: Option<String>,
    destination_number: Option<String>,
    destination_uuid: Option<String>,
    timestamp: Option<i64>,
    message: Option<String>,
    group_info: Option<RawGroupInfo>,
    attachments: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceiptMessage {
    when: Option<i64>,
    #[serde(default)]
    is_delivery: bool,
    #[serde(default)]
    is_read: bool,
    #[serde(default)]
    is_viewed: bool,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    timestamps: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTypingMessage {
    action: Option<String>,
    timestamp: Option<i64>,
    group_id: Option<String>,
}

impl RawReceiptMessage {
    fn kind(&self) -> ReceiptKind {
        if let Some(kind) = self.kind.as_deref() {
            return match kind.to_ascii_lowercase().as_str() {
                "read" => ReceiptKind::Read,
                "viewed" => ReceiptKind::Viewed,
                "delivery" | "delivered" => ReceiptKind::Delivery,
                _ => ReceiptKind::Unknown,
            };
        }
        if self.is_viewed {
            ReceiptKind::Viewed
        } else if self.is_read {
            ReceiptKind::Read
        } else if self.is_delivery {
            ReceiptKind::Delivery
        } else {
            ReceiptKind::Unknown
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Decode one complete line received from the daemon.
pub fn classify_line(line: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(line)?;
    classify_value(value)
}

/// Decode an already-parsed JSON value.
pub fn classify_value(value: Value) -> Result<Inbound, ProtocolError> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        other => return Err(ProtocolError::NotAnObject(json_kind(&other))),
    };

    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(id) => Some(
            id.as_u64()
                .ok_or_else(|| ProtocolError::InvalidId(id.clone()))?,
        ),
    };

    let Some(id) = id else {
        return Ok(Inbound::Notification(classify_envelope(extract_payload(obj))));
    };

    let outcome = match obj.remove("error") {
        Some(Value::Null) | None => Ok(obj.remove("result").unwrap_or(Value::Null)),
        Some(err) => Err(serde_json::from_value::<RpcErrorObject>(err).map_err(|e| {
            ProtocolError::InvalidError {
                id,
                reason: e.to_string(),
            }
        })?),
    };
    Ok(Inbound::Response { id, outcome })
}

/// Unwrap the envelope from the notification shapes the daemon uses:
/// `{method:"receive", params:{envelope}}`, `{envelope}`, or a bare envelope.
fn extract_payload(mut obj: Map<String, Value>) -> Value {
    if let Some(Value::Object(params)) = obj.get_mut("params") {
        if let Some(envelope) = params.remove("envelope") {
            return envelope;
        }
    }
    if let Some(envelope) = obj.remove("envelope") {
        return envelope;
    }
    Value::Object(obj)
}

/// Classify a notification payload. Never fails: anything unrecognised is
/// returned as [`Envelope::Other`].
pub fn classify_envelope(payload: Value) -> Envelope {
    let raw = match RawEnvelope::deserialize(&payload) {
        Ok(raw) => raw,
        Err(_) => return Envelope::Other(payload),
    };

    let sender = Peer {
        handle: raw.source,
        number: raw.source_number,
        uuid: raw.source_uuid,
        name: raw.source_name,
    };

    if let Some(receipt) = raw.receipt_message {
        return Envelope::Receipt(Receipt {
            sender,
            kind: receipt.kind(),
            timestamps: receipt.timestamps,
            when: receipt.when,
        });
    }

    if let Some(typing) = raw.typing_message {
        let action = match typing.action.as_deref() {
            Some(a) if a.eq_ignore_ascii_case("stopped") => TypingAction::Stopped,
            _ => TypingAction::Started,
        };
        return Envelope::Typing(Typing {
            sender,
            action,
            group_id: typing.group_id,
            timestamp: typing.timestamp,
        });
    }

    if let Some(sent) = raw.sync_message.and_then(|s| s.sent_message) {
        if let Some(timestamp) = sent.timestamp.or(raw.timestamp) {
            return Envelope::Sync(SyncedMessage {
                destination: Peer {
                    handle: sent.destination,
                    number: sent.destination_number,
                    uuid: sent.destination_uuid,
                    name: None,
                },
                group_id: sent.group_info.and_then(|g| g.group_id),
                text: sent.message,
                attachment_count: sent.attachments.map_or(0, |a| a.len()),
                timestamp,
            });
        }
    }

    if let Some(data) = raw.data_message {
        if let Some(timestamp) = data.timestamp.or(raw.timestamp) {
            return Envelope::Message(IncomingMessage {
                sender,
                group_id: data.group_info.and_then(|g| g.group_id),
                text: data.message,
                attachment_count: data.attachments.map_or(0, |a| a.len()),
                timestamp,
            });
        }
    }

    Envelope::Other(payload)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification(line: &str) -> Envelope {
        match classify_line(line).expect("valid line") {
            Inbound::Notification(env) => env,
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn request_serializes_as_one_line() {
        let params = json!({"recipient": ["+15551234567"], "message": "hi"});
        let line = RpcRequest::new(7, "send", Some(&params)).to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["method"], "send");
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["params"]["message"], "hi");
    }

    #[test]
    fn request_without_params_omits_the_field() {
        let line = RpcRequest::new(1, "listAccounts", None).to_line().unwrap();
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert!(parsed.get("params").is_none());
    }

    #[test]
    fn response_with_result() {
        let inbound = classify_line(r#"{"jsonrpc":"2.0","result":{"deviceLinkUri":"sgnl://x"},"id":3}"#)
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Response {
                id: 3,
                outcome: Ok(json!({"deviceLinkUri": "sgnl://x"})),
            }
        );
    }

    #[test]
    fn response_without_result_is_null() {
        let inbound = classify_line(r#"{"jsonrpc":"2.0","id":4}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Response {
                id: 4,
                outcome: Ok(Value::Null),
            }
        );
    }

    #[test]
    fn response_with_error() {
        let inbound = classify_line(
            r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":9}"#,
        )
        .unwrap();
        match inbound {
            Inbound::Response { id, outcome: Err(err) } => {
                assert_eq!(id, 9);
                assert_eq!(err.code, -32601);
                assert_eq!(err.message, "Method not found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_id_is_a_notification() {
        let env = notification(r#"{"jsonrpc":"2.0","id":null,"result":{"foo":1}}"#);
        assert!(matches!(env, Envelope::Other(_)));
    }

    #[test]
    fn wrapped_receive_data_message() {
        let env = notification(
            r#"{"jsonrpc":"2.0","method":"receive","params":{"envelope":{
                "source":"+15551234567","sourceNumber":"+15551234567","sourceUuid":"u-1",
                "sourceName":"Alice","timestamp":1700000000000,
                "dataMessage":{"timestamp":1700000000000,"message":"hello","groupInfo":null}
            },"account":"+15550000000"}}"#,
        );
        match env {
            Envelope::Message(msg) => {
                assert_eq!(msg.timestamp, 1_700_000_000_000);
                assert_eq!(msg.text.as_deref(), Some("hello"));
                assert_eq!(msg.sender.name.as_deref(), Some("Alice"));
                assert_eq!(msg.sender.conversation_key(None).as_str(), "+15551234567");
                assert!(msg.group_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bare_and_envelope_shapes_are_accepted() {
        let bare = notification(r#"{"source":"+1555","timestamp":5,"dataMessage":{"message":"a"}}"#);
        let wrapped =
            notification(r#"{"envelope":{"source":"+1555","timestamp":5,"dataMessage":{"message":"a"}}}"#);
        assert_eq!(bare, wrapped);
        assert!(matches!(bare, Envelope::Message(IncomingMessage { timestamp: 5, .. })));
    }

    #[test]
    fn group_message_carries_group_id() {
        let env = notification(
            r#"{"envelope":{"sourceNumber":"+1555","timestamp":10,
                "dataMessage":{"timestamp":10,"message":"yo","groupInfo":{"groupId":"Z3JvdXA="}}}}"#,
        );
        match env {
            Envelope::Message(msg) => {
                assert_eq!(msg.group_id.as_deref(), Some("Z3JvdXA="));
                assert_eq!(msg.sender.conversation_key(msg.group_id.as_deref()).as_str(), "Z3JvdXA=");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn synced_send_uses_destination() {
        let env = notification(
            r#"{"envelope":{"sourceNumber":"+15550000000","timestamp":20,
                "syncMessage":{"sentMessage":{"destinationNumber":"+1 555 123 4567",
                "timestamp":20,"message":"from my phone"}}}}"#,
        );
        match env {
            Envelope::Sync(sync) => {
                assert_eq!(sync.timestamp, 20);
                assert_eq!(sync.destination.conversation_key(None).as_str(), "+15551234567");
                assert_eq!(sync.text.as_deref(), Some("from my phone"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn receipt_outranks_everything() {
        let env = notification(
            r#"{"envelope":{"sourceNumber":"+1555","timestamp":30,
                "receiptMessage":{"when":31,"isDelivery":false,"isRead":true,"timestamps":[1,2]},
                "typingMessage":{"action":"STARTED"},
                "dataMessage":{"message":"ignored"}}}"#,
        );
        match env {
            Envelope::Receipt(r) => {
                assert_eq!(r.kind, ReceiptKind::Read);
                assert_eq!(r.timestamps, vec![1, 2]);
                assert_eq!(r.when, Some(31));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn typing_outranks_sync_and_data() {
        let env = notification(
            r#"{"envelope":{"sourceNumber":"+1555","timestamp":40,
                "typingMessage":{"action":"STOPPED","timestamp":40},
                "syncMessage":{"sentMessage":{"destination":"+1666","timestamp":40}}}}"#,
        );
        assert!(matches!(
            env,
            Envelope::Typing(Typing { action: TypingAction::Stopped, .. })
        ));
    }

    #[test]
    fn receipt_type_field_is_honoured() {
        let env = notification(
            r#"{"envelope":{"source":"u-2","timestamp":1,
                "receiptMessage":{"type":"VIEWED","timestamps":[5]}}}"#,
        );
        assert!(matches!(env, Envelope::Receipt(Receipt { kind: ReceiptKind::Viewed, .. })));
    }

    #[test]
    fn sync_without_sent_message_passes_through() {
        let env = notification(
            r#"{"envelope":{"source":"u-2","timestamp":1,"syncMessage":{"readMessages":[]}}}"#,
        );
        assert!(matches!(env, Envelope::Other(_)));
    }

    #[test]
    fn unknown_payload_passes_through_untouched() {
        let env = notification(r#"{"method":"receive","params":{"envelope":{"timestamp":1,"callMessage":{}}}}"#);
        assert_eq!(env, Envelope::Other(json!({"timestamp": 1, "callMessage": {}})));
    }

    #[test]
    fn attachment_only_message_gets_placeholder() {
        let env = notification(
            r#"{"envelope":{"sourceNumber":"+1555","timestamp":50,
                "dataMessage":{"attachments":[{"contentType":"image/png"}]}}}"#,
        );
        match env {
            Envelope::Message(msg) => {
                assert_eq!(msg.display_text().as_deref(), Some(ATTACHMENT_PLACEHOLDER));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(matches!(classify_line("{\"c\""), Err(ProtocolError::Json(_))));
        assert!(matches!(classify_line("[1,2]"), Err(ProtocolError::NotAnObject("array"))));
        assert!(matches!(
            classify_line(r#"{"id":"abc","result":1}"#),
            Err(ProtocolError::InvalidId(_))
        ));
    }

    #[test]
    fn best_handle_prefers_number() {
        let peer = Peer {
            handle: Some("u-1".into()),
            number: Some("+1555".into()),
            uuid: Some("u-1".into()),
            name: None,
        };
        assert_eq!(peer.best_handle(), Some("+1555"));
        assert_eq!(Peer::default().best_handle(), None);
    }
}

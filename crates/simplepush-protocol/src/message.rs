//! Outbound message builders and a read-only view over server responses.
//!
//! [`ProtocolMessage`] wraps a JSON object, so `messageType` may hold any
//! string and required keys may be left out or joined by unknown ones.

use crate::error::Result;
use crate::status::Status;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Marker servers place in the `error` field of a rejected command.
pub const INVALID_COMMAND: &str = "Invalid Command";

pub const KEY_MESSAGE_TYPE: &str = "messageType";
pub const KEY_UAID: &str = "uaid";
pub const KEY_CHANNEL_ID: &str = "channelID";
pub const KEY_CHANNEL_IDS: &str = "channelIDs";
pub const KEY_UPDATES: &str = "updates";
pub const KEY_STATUS: &str = "status";
pub const KEY_ERROR: &str = "error";
pub const KEY_PUSH_ENDPOINT: &str = "pushEndpoint";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Hello,
    Register,
    Unregister,
    Ack,
    Ping,
    Purge,
    Notification,
}

impl MessageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Register => "register",
            Self::Unregister => "unregister",
            Self::Ack => "ack",
            Self::Ping => "ping",
            Self::Purge => "purge",
            Self::Notification => "notification",
        }
    }

    /// Parses a wire name. Matching is exact and case-sensitive.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "hello" => Some(Self::Hello),
            "register" => Some(Self::Register),
            "unregister" => Some(Self::Unregister),
            "ack" => Some(Self::Ack),
            "ping" => Some(Self::Ping),
            "purge" => Some(Self::Purge),
            "notification" => Some(Self::Notification),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `{channelID, version}` pair, as carried in `ack` requests and
/// `notification` pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    pub version: u64,
}

impl UpdateRecord {
    #[must_use]
    pub fn new(channel_id: impl Into<String>, version: u64) -> Self {
        Self {
            channel_id: channel_id.into(),
            version,
        }
    }
}

/// An outbound message: a JSON object built up field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolMessage {
    fields: Map<String, Value>,
}

impl ProtocolMessage {
    #[must_use]
    pub fn new(message_type: MessageType) -> Self {
        Self::with_raw_type(message_type.as_str())
    }

    /// A message whose `messageType` is an arbitrary string.
    #[must_use]
    pub fn with_raw_type(message_type: impl Into<String>) -> Self {
        Self::empty().with_field(KEY_MESSAGE_TYPE, message_type.into())
    }

    /// The empty object `{}`, which servers accept as a keep-alive.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn hello(uaid: impl Into<String>, channel_ids: &[&str]) -> Self {
        Self::new(MessageType::Hello)
            .with_uaid(uaid)
            .with_channel_ids(channel_ids)
    }

    #[must_use]
    pub fn register(channel_id: impl Into<String>) -> Self {
        Self::new(MessageType::Register).with_channel_id(channel_id)
    }

    #[must_use]
    pub fn unregister(channel_id: impl Into<String>) -> Self {
        Self::new(MessageType::Unregister).with_channel_id(channel_id)
    }

    #[must_use]
    pub fn ack(updates: &[UpdateRecord]) -> Self {
        Self::new(MessageType::Ack).with_updates(updates)
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    #[must_use]
    pub fn purge() -> Self {
        Self::new(MessageType::Purge)
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_uaid(self, uaid: impl Into<String>) -> Self {
        self.with_field(KEY_UAID, uaid.into())
    }

    #[must_use]
    pub fn with_channel_id(self, channel_id: impl Into<String>) -> Self {
        self.with_field(KEY_CHANNEL_ID, channel_id.into())
    }

    #[must_use]
    pub fn with_channel_ids(self, channel_ids: &[&str]) -> Self {
        let ids: Vec<Value> = channel_ids.iter().map(|id| Value::from(*id)).collect();
        self.with_field(KEY_CHANNEL_IDS, ids)
    }

    #[must_use]
    pub fn with_updates(self, updates: &[UpdateRecord]) -> Self {
        let records: Vec<Value> = updates
            .iter()
            .map(|u| {
                let mut record = Map::new();
                record.insert(KEY_CHANNEL_ID.to_owned(), Value::from(u.channel_id.clone()));
                record.insert("version".to_owned(), Value::from(u.version));
                Value::Object(record)
            })
            .collect();
        self.with_field(KEY_UPDATES, records)
    }

    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        self.fields.get(KEY_MESSAGE_TYPE).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }
}

impl From<ProtocolMessage> for Value {
    fn from(message: ProtocolMessage) -> Self {
        Value::Object(message.fields)
    }
}

impl fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.fields.clone()))
    }
}

/// Read-only accessors over a decoded server response.
#[derive(Debug, Clone, Copy)]
pub struct Response<'a> {
    value: &'a Value,
}

impl<'a> Response<'a> {
    #[must_use]
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    fn str_field(&self, key: &str) -> Option<&'a str> {
        self.value.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn message_type(&self) -> Option<&'a str> {
        self.str_field(KEY_MESSAGE_TYPE)
    }

    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.value.get(KEY_STATUS).and_then(Status::from_json)
    }

    #[must_use]
    pub fn uaid(&self) -> Option<&'a str> {
        self.str_field(KEY_UAID)
    }

    #[must_use]
    pub fn push_endpoint(&self) -> Option<&'a str> {
        self.str_field(KEY_PUSH_ENDPOINT)
    }

    #[must_use]
    pub fn error(&self) -> Option<&'a Value> {
        self.value.get(KEY_ERROR)
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error().is_some_and(|e| !e.is_null())
    }

    /// `true` for the bare `{}` some servers answer a keep-alive with.
    #[must_use]
    pub fn is_empty_object(&self) -> bool {
        self.value.as_object().is_some_and(Map::is_empty)
    }

    /// Update records; entries that do not decode are skipped.
    #[must_use]
    pub fn updates(&self) -> Vec<UpdateRecord> {
        self.value
            .get(KEY_UPDATES)
            .and_then(Value::as_array)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|r| serde_json::from_value(r.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hello_builder_shape() {
        let msg = ProtocolMessage::hello("abc", &["c1", "c2"]);
        assert_eq!(
            msg.to_json(),
            json!({"messageType": "hello", "uaid": "abc", "channelIDs": ["c1", "c2"]})
        );
        assert_eq!(msg.message_type(), Some("hello"));
    }

    #[test]
    fn test_ack_updates_use_wire_names() {
        let msg = ProtocolMessage::ack(&[UpdateRecord::new("chan", 23)]);
        assert_eq!(
            msg.to_json(),
            json!({"messageType": "ack", "updates": [{"channelID": "chan", "version": 23}]})
        );
    }

    #[test]
    fn test_raw_type_and_field_overrides() {
        let msg = ProtocolMessage::with_raw_type("HeLLO")
            .with_field("customKey", "custom value")
            .with_field(KEY_MESSAGE_TYPE, Value::Null);
        assert_eq!(msg.message_type(), None);
        assert_eq!(msg.get("customKey"), Some(&json!("custom value")));
        assert_eq!(msg.encode().unwrap(), r#"{"customKey":"custom value","messageType":null}"#);
    }

    #[test]
    fn test_empty_message_encodes_as_empty_object() {
        assert_eq!(ProtocolMessage::empty().encode().unwrap(), "{}");
        assert!(!ProtocolMessage::ping().is_empty());
    }

    #[test]
    fn test_message_type_names() {
        for t in [
            MessageType::Hello,
            MessageType::Register,
            MessageType::Unregister,
            MessageType::Ack,
            MessageType::Ping,
            MessageType::Purge,
            MessageType::Notification,
        ] {
            assert_eq!(MessageType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MessageType::parse("HeLLO"), None);
    }

    #[test]
    fn test_response_accessors() {
        let value = json!({
            "messageType": "notification",
            "status": "200",
            "updates": [{"channelID": "c1", "version": 7}, {"bogus": true}]
        });
        let resp = Response::new(&value);
        assert_eq!(resp.message_type(), Some("notification"));
        assert_eq!(resp.status(), Some(Status::Ok));
        assert_eq!(resp.updates(), vec![UpdateRecord::new("c1", 7)]);
        assert!(!resp.has_error());
        assert!(!resp.is_empty_object());
        assert!(Response::new(&json!({})).is_empty_object());
    }
}

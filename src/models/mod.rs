use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message type stored on a chat message document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageType {
    /// Free-form text message
    Text,
    /// Voice recording
    Voice,
    /// Image attachment
    Image,
    /// System/log line, never pushed to users
    System,
    /// Unrecognized type tag, treated like empty text
    Other(String),
}

impl MessageType {
    pub fn parse(s: &str) -> Self {
        match s {
            "text" => MessageType::Text,
            "voice" => MessageType::Voice,
            "image" => MessageType::Image,
            "system" => MessageType::System,
            other => MessageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Text => "text",
            MessageType::Voice => "voice",
            MessageType::Image => "image",
            MessageType::System => "system",
            MessageType::Other(tag) => tag.as_str(),
        }
    }
}

/// A newly created chat message, as handed to the fanout pipeline.
///
/// Read-only input: the pipeline never writes back to the message.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub room_id: String,
    pub message_id: String,
    pub message_type: MessageType,
    pub sender_app_user_id: String,
    pub text: Option<String>,
}

impl MessageEvent {
    /// Build a message event from the stored document fields.
    ///
    /// Missing or non-string fields degrade to empty values, matching
    /// how loosely the client apps have historically written them.
    pub fn from_fields(
        room_id: String,
        message_id: String,
        fields: &BTreeMap<String, Value>,
    ) -> Self {
        let message_type = MessageType::parse(string_field(fields, "type").unwrap_or_default());
        let sender_app_user_id = string_field(fields, "senderId").unwrap_or_default().to_string();
        let text = string_field(fields, "text").map(String::from);

        Self {
            room_id,
            message_id,
            message_type,
            sender_app_user_id,
            text,
        }
    }
}

/// Firestore typed value
///
/// The document store persists every field as a single-key object
/// tagging its type (`{"stringValue": "joy"}`). This is the tagged
/// union at the ingestion boundary; everything downstream works on
/// the normalized [`Room`] and [`UserRecord`] types instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    StringValue(String),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    NullValue(Option<serde_json::Value>),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ArrayValue {
    #[serde(default)]
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MapValue {
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::StringValue(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A stored document: resource name plus typed fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

fn string_field<'a>(fields: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

/// Collect trimmed, non-empty strings out of an array-of-strings field
fn string_list(fields: &BTreeMap<String, Value>, key: &str) -> Option<Vec<String>> {
    match fields.get(key) {
        Some(Value::ArrayValue(array)) => Some(
            array
                .values
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        ),
        _ => None,
    }
}

/// A conversation container, normalized from either legacy storage shape
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Room {
    /// Member app-user ids; order carries no meaning
    pub member_ids: Vec<String>,
    /// Explicit room kind ("dm" | "group"), when stored
    pub kind: Option<String>,
}

impl Room {
    /// Normalize a room document.
    ///
    /// Group rooms store members under `memberIds`, DM rooms under
    /// `participants`; either is accepted, `memberIds` winning when
    /// both are present. Rooms carrying neither normalize to an empty
    /// member set, which terminates the fanout.
    pub fn from_fields(fields: &BTreeMap<String, Value>) -> Self {
        let member_ids = string_list(fields, "memberIds")
            .or_else(|| string_list(fields, "participants"))
            .unwrap_or_default();

        let kind = string_field(fields, "kind")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        Self { member_ids, kind }
    }
}

/// A user record with its registered push tokens, normalized from
/// either legacy token shape
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    /// Full document resource name, needed for the cleanup write
    pub doc_name: String,
    pub app_user_id: String,
    /// Trimmed, non-empty tokens; may still repeat across users
    pub tokens: Vec<String>,
}

impl UserRecord {
    /// Normalize a user document.
    ///
    /// Token storage exists in two shapes: an array of token strings,
    /// or a map of token to flag where the keys are the tokens. Both
    /// collapse into a plain token list here.
    pub fn from_document(doc: &Document, token_field: &str) -> Self {
        let app_user_id = string_field(&doc.fields, "appUserId")
            .unwrap_or_default()
            .to_string();

        let tokens = match doc.fields.get(token_field) {
            Some(Value::ArrayValue(array)) => array
                .values
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
            Some(Value::MapValue(map)) => map
                .fields
                .keys()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        };

        Self {
            doc_name: doc.name.clone(),
            app_user_id,
            tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields_from_json(json: serde_json::Value) -> BTreeMap<String, Value> {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_message_type_parse() {
        assert_eq!(MessageType::parse("text"), MessageType::Text);
        assert_eq!(MessageType::parse("voice"), MessageType::Voice);
        assert_eq!(MessageType::parse("image"), MessageType::Image);
        assert_eq!(MessageType::parse("system"), MessageType::System);
        assert_eq!(
            MessageType::parse("sticker"),
            MessageType::Other("sticker".to_string())
        );
    }

    #[test]
    fn test_value_decodes_typed_fields() {
        let fields = fields_from_json(serde_json::json!({
            "kind": {"stringValue": "group"},
            "archived": {"booleanValue": false},
            "memberCount": {"integerValue": "3"}
        }));

        assert_eq!(fields.get("kind").unwrap().as_str(), Some("group"));
        assert_eq!(fields.get("archived"), Some(&Value::BooleanValue(false)));
        assert_eq!(fields.get("memberCount").unwrap().as_str(), None);
    }

    #[test]
    fn test_room_from_member_ids() {
        let fields = fields_from_json(serde_json::json!({
            "memberIds": {"arrayValue": {"values": [
                {"stringValue": "adi"},
                {"stringValue": " joy "},
                {"stringValue": ""}
            ]}},
            "kind": {"stringValue": "group"}
        }));

        let room = Room::from_fields(&fields);
        assert_eq!(room.member_ids, vec!["adi", "joy"]);
        assert_eq!(room.kind.as_deref(), Some("group"));
    }

    #[test]
    fn test_room_from_participants() {
        let fields = fields_from_json(serde_json::json!({
            "participants": {"arrayValue": {"values": [
                {"stringValue": "adi"},
                {"stringValue": "joy"}
            ]}}
        }));

        let room = Room::from_fields(&fields);
        assert_eq!(room.member_ids, vec!["adi", "joy"]);
        assert_eq!(room.kind, None);
    }

    #[test]
    fn test_room_without_member_fields_is_empty() {
        let fields = fields_from_json(serde_json::json!({
            "title": {"stringValue": "general"}
        }));

        let room = Room::from_fields(&fields);
        assert!(room.member_ids.is_empty());
    }

    #[test]
    fn test_user_record_from_token_array() {
        let doc: Document = serde_json::from_value(serde_json::json!({
            "name": "projects/p/databases/(default)/documents/users/u1",
            "fields": {
                "appUserId": {"stringValue": "joy"},
                "fcmTokens": {"arrayValue": {"values": [
                    {"stringValue": "t1"},
                    {"stringValue": " t2 "},
                    {"stringValue": "   "}
                ]}}
            }
        }))
        .unwrap();

        let record = UserRecord::from_document(&doc, "fcmTokens");
        assert_eq!(record.app_user_id, "joy");
        assert_eq!(record.tokens, vec!["t1", "t2"]);
    }

    #[test]
    fn test_user_record_from_token_map() {
        let doc: Document = serde_json::from_value(serde_json::json!({
            "name": "projects/p/databases/(default)/documents/users/u2",
            "fields": {
                "appUserId": {"stringValue": "adi"},
                "fcmTokens": {"mapValue": {"fields": {
                    "tok-a": {"booleanValue": true},
                    "tok-b": {"booleanValue": true}
                }}}
            }
        }))
        .unwrap();

        let record = UserRecord::from_document(&doc, "fcmTokens");
        assert_eq!(record.tokens, vec!["tok-a", "tok-b"]);
    }

    #[test]
    fn test_user_record_without_tokens() {
        let doc: Document = serde_json::from_value(serde_json::json!({
            "name": "projects/p/databases/(default)/documents/users/u3",
            "fields": {
                "appUserId": {"stringValue": "sam"}
            }
        }))
        .unwrap();

        let record = UserRecord::from_document(&doc, "fcmTokens");
        assert!(record.tokens.is_empty());
    }

    #[test]
    fn test_message_event_from_fields() {
        let fields = fields_from_json(serde_json::json!({
            "type": {"stringValue": "text"},
            "senderId": {"stringValue": "adi"},
            "text": {"stringValue": "hello"}
        }));

        let event = MessageEvent::from_fields("r1".to_string(), "m1".to_string(), &fields);
        assert_eq!(event.message_type, MessageType::Text);
        assert_eq!(event.sender_app_user_id, "adi");
        assert_eq!(event.text.as_deref(), Some("hello"));
    }

    #[test]
    fn test_message_event_missing_fields() {
        let fields = BTreeMap::new();
        let event = MessageEvent::from_fields("r1".to_string(), "m1".to_string(), &fields);
        assert_eq!(event.message_type, MessageType::Other(String::new()));
        assert_eq!(event.sender_app_user_id, "");
        assert_eq!(event.text, None);
    }
}

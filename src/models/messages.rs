use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdateMessage {
    #[serde(default)]
    pub code: String,
    pub cursor_position: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdateMessage {
    pub cursor_position: Option<i64>,
    pub user_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PingMessage {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InitMessage {
    pub code: String,
    pub language: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PongMessage {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PresenceMessage {
    pub users: usize,
}

/// Messages sent by clients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "code_update")]
    CodeUpdate(CodeUpdateMessage),
    #[serde(rename = "cursor_update")]
    CursorUpdate(CursorUpdateMessage),
    #[serde(rename = "ping")]
    Ping(PingMessage),
    #[serde(other)]
    Unknown,
}

/// Messages sent to clients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "init")]
    Init(InitMessage),
    #[serde(rename = "code_update")]
    CodeUpdate(CodeUpdateMessage),
    #[serde(rename = "cursor_update")]
    CursorUpdate(CursorUpdateMessage),
    #[serde(rename = "user_joined")]
    UserJoined(PresenceMessage),
    #[serde(rename = "user_left")]
    UserLeft(PresenceMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
}

impl ReceivedMessage {
    /// Parse a client frame.
    ///
    /// Frames without a `type` field are read as `code_update`, which is what
    /// existing clients rely on when they send bare `{ "code": ... }` objects.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;
        if let Some(object) = value.as_object_mut() {
            object
                .entry("type")
                .or_insert_with(|| serde_json::Value::String("code_update".to_string()));
        }
        serde_json::from_value(value)
    }
}

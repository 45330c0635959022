use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for creating a room
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateRoomRequest {
    /// Language of the room, the configured default when omitted
    #[serde(default)]
    pub language: Option<String>,
}

/// Response for a created room
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub code: String,
    pub language: String,
}

/// Response for a room lookup
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub room_id: String,
    /// Live text if the room is active, else the persisted text
    pub code: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

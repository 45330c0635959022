use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn default_language() -> String {
    "python".to_string()
}

/// Request body for an autocomplete suggestion
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutocompleteRequest {
    pub code: String,
    /// Cursor offset in characters
    pub cursor_position: usize,
    #[serde(default = "default_language")]
    pub language: String,
}

/// Suggested completion and where to insert it
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutocompleteResponse {
    pub suggestion: String,
    pub insert_position: usize,
}

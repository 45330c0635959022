use axum::Json;
use crate::{models::{AutocompleteRequest, AutocompleteResponse}, services::autocomplete_service};

/// Rule-based completion for the line under the cursor
pub async fn autocomplete(Json(request): Json<AutocompleteRequest>) -> Json<AutocompleteResponse> {
    Json(autocomplete_service::suggest(&request.code, request.cursor_position, &request.language))
}

use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Create a room
#[utoipa::path(
    post,
    path = "/rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = CreateRoomResponse),
        (status = 500, description = "Storage unavailable", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn create_room_doc() {}

/// Get a room
#[utoipa::path(
    get,
    path = "/rooms/{room_id}",
    params(
        ("room_id" = String, Path, description = "Room id")
    ),
    responses(
        (status = 200, description = "Room found", body = RoomResponse),
        (status = 404, description = "Room not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn get_room_doc() {}

/// Autocomplete suggestion
#[utoipa::path(
    post,
    path = "/autocomplete",
    request_body = AutocompleteRequest,
    responses(
        (status = 200, description = "Suggestion for the cursor position", body = AutocompleteResponse)
    )
)]
#[allow(dead_code)]
pub async fn autocomplete_doc() {}

/// Server diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Connection, room and system statistics", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        create_room_doc,
        get_room_doc,
        autocomplete_doc,
        diagnostics_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            CreateRoomRequest,
            CreateRoomResponse,
            RoomResponse,
            AutocompleteRequest,
            AutocompleteResponse,
            DiagnosticsResponse,
        )
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;

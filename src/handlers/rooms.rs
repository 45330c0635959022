use crate::{
    models::{CreateRoomRequest, CreateRoomResponse, ErrorResponse, RoomResponse},
    state::AppState,
};
use axum::{extract::{Path, State}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::{error, info};

/// Create a room with a fresh id
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    request: Option<Json<CreateRoomRequest>>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), (StatusCode, Json<ErrorResponse>)> {

    let language = request
        .and_then(|Json(request)| request.language)
        .map(|language| language.trim().to_string())
        .filter(|language| !language.is_empty())
        .unwrap_or_else(|| state.config.default_language.clone());

    match state.store.create_room(None, &language).await {
        Ok(room) => {
            info!("Created room {} ({})", room.id, room.language);
            Ok((
                StatusCode::OK,
                Json(CreateRoomResponse {
                    room_id: room.id,
                    code: room.code,
                    language: room.language,
                }),
            ))
        }
        Err(e) => {
            error!("Failed to create room: {}", e);
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            Err((status, Json(ErrorResponse {
                code: status.as_u16(),
                status: status.to_string(),
                error: "Failed to create room".to_string(),
            })))
        }
    }
}

/// Get a room, preferring the live text of an active room
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<(StatusCode, Json<RoomResponse>), (StatusCode, Json<ErrorResponse>)> {

    let room = match state.store.fetch_room(&room_id).await {
        Ok(Some(room)) => room,
        Ok(None) => {
            let status = StatusCode::NOT_FOUND;
            return Err((status, Json(ErrorResponse {
                code: status.as_u16(),
                status: status.to_string(),
                error: "Room not found".to_string(),
            })));
        }
        Err(e) => {
            error!("Failed to fetch room '{}': {}", room_id, e);
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            return Err((status, Json(ErrorResponse {
                code: status.as_u16(),
                status: status.to_string(),
                error: format!("Failed to fetch room '{}'", room_id),
            })));
        }
    };

    let code = state.rooms.live_text(&room_id).await.unwrap_or(room.code);

    Ok((
        StatusCode::OK,
        Json(RoomResponse {
            room_id: room.id,
            code,
            language: room.language,
            created_at: room.created_at,
        }),
    ))
}

//! Room HTTP Handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use huddle_common::{NewRoom, Room, RoomUpdate};
use tracing::info;
use uuid::Uuid;

use super::error::RoomApiError;
use crate::api::AppState;

/// List active rooms.
///
/// GET /api/rooms
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<Room>> {
    Json(state.rooms.read().await.list_active())
}

/// Create a room.
///
/// POST /api/rooms
pub async fn create_room(
    State(state): State<AppState>,
    payload: Result<Json<NewRoom>, JsonRejection>,
) -> Result<(StatusCode, Json<Room>), RoomApiError> {
    let Json(new) = payload?;

    let room = state.rooms.write().await.create(new)?;
    info!(
        room_id = %room.room_id,
        created_by = %room.created_by,
        invites = room.pending_invites.len(),
        "Room created"
    );

    Ok((StatusCode::CREATED, Json(room)))
}

/// Apply room operations atomically.
///
/// PATCH /api/rooms/{room_id}
pub async fn update_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    payload: Result<Json<RoomUpdate>, JsonRejection>,
) -> Result<Json<Room>, RoomApiError> {
    let Json(update) = payload?;
    if update.ops.is_empty() {
        return Err(RoomApiError::Validation(
            "update must contain at least one op".into(),
        ));
    }

    let room = state.rooms.write().await.update(room_id, &update)?;
    if !room.is_active {
        info!(room_id = %room_id, "Room deactivated");
    }

    Ok(Json(room))
}

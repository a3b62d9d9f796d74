//! Signal HTTP Handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use huddle_common::SignalEnvelope;
use tracing::debug;
use uuid::Uuid;

use crate::api::AppState;
use crate::rooms::RoomApiError;

/// Queue a signal for its recipient.
///
/// POST /api/signals
pub async fn send_signal(
    State(state): State<AppState>,
    payload: Result<Json<SignalEnvelope>, JsonRejection>,
) -> Result<StatusCode, RoomApiError> {
    let Json(envelope) = payload?;
    if envelope.from == envelope.to {
        return Err(RoomApiError::Validation(
            "signal sender and recipient must differ".into(),
        ));
    }

    debug!(
        from = %envelope.from,
        to = %envelope.to,
        room_id = %envelope.room_id,
        kind = envelope.payload.kind(),
        "Signal queued"
    );
    state.signals.lock().await.push(envelope);

    Ok(StatusCode::ACCEPTED)
}

/// Take every queued signal for `user_id`, oldest first.
///
/// POST /api/signals/{user_id}/drain
pub async fn drain_signals(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Json<Vec<SignalEnvelope>> {
    Json(state.signals.lock().await.drain(user_id))
}

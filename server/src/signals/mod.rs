//! Signaling Mailbox Module
//!
//! Store-and-forward relay for offers, answers and ICE candidates. Clients
//! post envelopes addressed to a peer and drain their own mailbox by polling.

pub mod handlers;

use axum::routing::post;
use axum::Router;

use crate::api::AppState;

/// Signal routes, nested under `/api/signals`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::send_signal))
        .route("/{user_id}/drain", post(handlers::drain_signals))
}

//! API Router and Application State
//!
//! Central routing configuration and shared state.

use axum::{extract::State, routing::get, Json, Router};
use huddle_common::{RoomTable, SignalMailbox};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{config::Config, rooms, signals};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Every room, active or not
    pub rooms: Arc<RwLock<RoomTable>>,
    /// Undelivered signaling messages per recipient
    pub signals: Arc<Mutex<SignalMailbox>>,
    /// Server configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(RoomTable::new())),
            signals: Arc::new(Mutex::new(SignalMailbox::with_capacity(
                config.signal_mailbox_capacity,
            ))),
            config: Arc::new(config),
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api/rooms", rooms::router())
        .nest("/api/signals", signals::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Number of active rooms
    active_rooms: usize,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let active_rooms = state.rooms.read().await.list_active().len();
    Json(HealthResponse {
        status: "ok",
        active_rooms,
    })
}

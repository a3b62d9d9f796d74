//! Room Store Module
//!
//! HTTP surface of the room table. Every write goes through
//! [`huddle_common::RoomTable`] under one lock, so each request's ops land
//! atomically.

pub mod error;
pub mod handlers;

use axum::routing::{get, patch};
use axum::Router;

use crate::api::AppState;

pub use error::RoomApiError;

/// Room routes, nested under `/api/rooms`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_rooms).post(handlers::create_room))
        .route("/{room_id}", patch(handlers::update_room))
}

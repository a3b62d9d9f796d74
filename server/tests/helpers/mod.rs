//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for sending requests through the full axum router via
//! `tower::ServiceExt::oneshot`, plus builders for room payloads.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{self, Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use huddle_common::{NewRoom, Participant, PendingInvite, Room, RoomOp, RoomUpdate, UserIdentity};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::ServiceExt;
use uuid::Uuid;
use huddle_server::api::{create_router, AppState};
use huddle_server::config::Config;

/// Full router over fresh in-memory state.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Create a new test app with the default test config.
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    /// Create a test app with a custom config (for limit testing).
    pub fn with_config(config: Config) -> Self {
        let state = AppState::new(config);
        let router = create_router(state.clone());
        Self { router, state }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// Send `body` as JSON.
    pub async fn send_json<T: Serialize>(
        &self,
        method: Method,
        uri: &str,
        body: &T,
    ) -> Response<Body> {
        let request = Self::request(method, uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).expect("serialize body")))
            .expect("build request");
        self.oneshot(request).await
    }

    /// Send a request without a body.
    pub async fn send_empty(&self, method: Method, uri: &str) -> Response<Body> {
        let request = Self::request(method, uri)
            .body(Body::empty())
            .expect("build request");
        self.oneshot(request).await
    }

    /// Create a room through the API, expecting success.
    pub async fn create_room(&self, new: &NewRoom) -> Room {
        let response = self.send_json(Method::POST, "/api/rooms", new).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_as(response).await
    }

    /// Apply ops to a room through the API.
    pub async fn update_room(&self, room_id: Uuid, update: &RoomUpdate) -> Response<Body> {
        self.send_json(Method::PATCH, &format!("/api/rooms/{room_id}"), update)
            .await
    }

    /// List active rooms through the API.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let response = self.send_empty(Method::GET, "/api/rooms").await;
        assert_eq!(response.status(), StatusCode::OK);
        body_as(response).await
    }
}

/// A participant entry for a fresh user.
pub fn participant(name: &str) -> Participant {
    Participant::from_identity(&UserIdentity::new(Uuid::new_v4(), name))
}

/// A room created by `creator` inviting `target`.
pub fn new_room(creator: &Participant, target: Uuid) -> NewRoom {
    NewRoom {
        created_by: creator.user_id,
        participants: vec![creator.clone()],
        pending_invites: vec![PendingInvite::new(target, creator.user_id)],
    }
}

/// A single-op join update.
pub fn join(participant: &Participant) -> RoomUpdate {
    RoomOp::Join {
        participant: participant.clone(),
    }
    .into()
}

/// Read the response body as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

/// Read the response body as `T`.
pub async fn body_as<T: DeserializeOwned>(response: Response<Body>) -> T {
    serde_json::from_value(body_to_json(response).await).expect("unexpected response shape")
}

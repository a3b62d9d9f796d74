//! Store client for the reference backend.

use async_trait::async_trait;
use huddle_common::{NewRoom, Room, RoomUpdate, SignalEnvelope};
use reqwest::{Client as HttpClient, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use super::{RoomStore, SignalRelay, StoreError};
use crate::config::ClientConfig;

/// Error body returned by the backend.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: Option<String>,
}

/// Room store and signal relay over HTTP.
///
/// Plain request/response: no change notifications, so the poller falls back
/// to its fixed intervals.
#[derive(Clone)]
pub struct HttpRoomStore {
    http: HttpClient,
    base_url: String,
}

impl HttpRoomStore {
    /// Create a store client for the configured server.
    pub fn new(config: &ClientConfig) -> Result<Self, StoreError> {
        let http = HttpClient::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self::with_client(http, &config.server_url))
    }

    /// Use an existing HTTP client.
    pub fn with_client(http: HttpClient, server_url: &str) -> Self {
        Self {
            http,
            base_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let (message, code) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(e) => (e.error, e.code),
        Err(_) => (body, None),
    };
    Err(StoreError::Status {
        status,
        code,
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    check(response)
        .await?
        .json()
        .await
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

#[async_trait]
impl RoomStore for HttpRoomStore {
    async fn list_active_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let response = self
            .http
            .get(self.url("/api/rooms"))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn create_room(&self, room: NewRoom) -> Result<Room, StoreError> {
        let response = self
            .http
            .post(self.url("/api/rooms"))
            .json(&room)
            .send()
            .await
            .map_err(transport)?;
        let room: Room = decode(response).await?;
        debug!(room_id = %room.room_id, "Room created on server");
        Ok(room)
    }

    async fn update_room(&self, room_id: Uuid, update: RoomUpdate) -> Result<Room, StoreError> {
        let response = self
            .http
            .patch(self.url(&format!("/api/rooms/{room_id}")))
            .json(&update)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}

#[async_trait]
impl SignalRelay for HttpRoomStore {
    async fn send_signal(&self, envelope: SignalEnvelope) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.url("/api/signals"))
            .json(&envelope)
            .send()
            .await
            .map_err(transport)?;
        check(response).await?;
        Ok(())
    }

    async fn drain_signals(&self, user_id: Uuid) -> Result<Vec<SignalEnvelope>, StoreError> {
        let response = self
            .http
            .post(self.url(&format!("/api/signals/{user_id}/drain")))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let store = HttpRoomStore::with_client(HttpClient::new(), "http://localhost:8080/");
        assert_eq!(store.url("/api/rooms"), "http://localhost:8080/api/rooms");
    }

    #[test]
    fn test_store_has_no_push() {
        let store = HttpRoomStore::new(&ClientConfig::default()).unwrap();
        assert!(store.watch().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let store = HttpRoomStore::with_client(HttpClient::new(), "http://127.0.0.1:1");
        let result = store.list_active_rooms().await;
        assert!(matches!(result, Err(StoreError::Transport(_))));
    }
}

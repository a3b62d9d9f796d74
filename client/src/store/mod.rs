//! Room Store and Signal Relay
//!
//! The persistent room record store is the single source of truth shared by
//! every participant. The signal relay carries offer/answer/candidate
//! envelopes between two peers through the same backend.

use async_trait::async_trait;
use huddle_common::{NewRoom, Room, RoomUpdate, SignalEnvelope};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

mod http;
mod memory;

pub use http::HttpRoomStore;
pub use memory::MemoryRoomStore;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Transport(String),
    #[error("Store returned {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("Invalid store response: {0}")]
    Decode(String),
    #[error("Rejected: {0}")]
    Rejected(#[from] huddle_common::Error),
}

impl StoreError {
    /// Whether the store refused the request, as opposed to being unreachable.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        match self {
            Self::Rejected(_) => true,
            Self::Status { status, .. } => *status >= 400 && *status < 500,
            Self::Transport(_) | Self::Decode(_) => false,
        }
    }
}

/// Persistent room record store.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Every room with `is_active = true`.
    async fn list_active_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Create a room. The store assigns its ID.
    async fn create_room(&self, room: NewRoom) -> Result<Room, StoreError>;

    /// Apply an atomic update.
    async fn update_room(&self, room_id: Uuid, update: RoomUpdate) -> Result<Room, StoreError>;

    /// Change notifications, if the store can push them.
    fn watch(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

/// Per-recipient signaling mailbox.
#[async_trait]
pub trait SignalRelay: Send + Sync {
    /// Queue an envelope for `envelope.to`.
    async fn send_signal(&self, envelope: SignalEnvelope) -> Result<(), StoreError>;

    /// Take every envelope queued for `user_id`, oldest first.
    async fn drain_signals(&self, user_id: Uuid) -> Result<Vec<SignalEnvelope>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        assert!(StoreError::Rejected(huddle_common::Error::EmptyRoom).is_rejection());
        assert!(StoreError::Status {
            status: 409,
            code: Some("VERSION_CONFLICT".into()),
            message: "conflict".into(),
        }
        .is_rejection());
        assert!(!StoreError::Status {
            status: 503,
            code: None,
            message: "down".into(),
        }
        .is_rejection());
        assert!(!StoreError::Transport("refused".into()).is_rejection());
    }
}

//! Room Operation Errors

use thiserror::Error;
use uuid::Uuid;

/// Result alias for room operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a room operation is rejected.
///
/// These are rejections, not failures: the store is unchanged when one is
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(Uuid),

    /// Room exists but has been deactivated.
    #[error("Room is no longer active: {0}")]
    RoomInactive(Uuid),

    /// User already participates in another active room.
    #[error("User {user_id} is already in active room {room_id}")]
    AlreadyInRoom {
        /// The user that tried to join.
        user_id: Uuid,
        /// The active room the user is already in.
        room_id: Uuid,
    },

    /// User is already a participant of this room and cannot be invited.
    #[error("User {0} is already a participant")]
    AlreadyParticipant(Uuid),

    /// Optimistic concurrency check failed.
    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// Version the caller based its update on.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Rooms cannot be created without participants.
    #[error("Room must have at least one participant")]
    EmptyRoom,
}

impl Error {
    /// Stable machine-readable code for the rejection.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "ROOM_NOT_FOUND",
            Self::RoomInactive(_) => "ROOM_INACTIVE",
            Self::AlreadyInRoom { .. } => "ALREADY_IN_ROOM",
            Self::AlreadyParticipant(_) => "ALREADY_PARTICIPANT",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::EmptyRoom => "EMPTY_ROOM",
        }
    }
}

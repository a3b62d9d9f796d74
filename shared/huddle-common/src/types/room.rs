//! Room Types
//!
//! The persisted room record and the atomic operations that mutate it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserIdentity;
use crate::error::{Error, Result};

/// A participant entry in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// User ID.
    pub user_id: Uuid,
    /// Display name at join time.
    pub user_name: String,
    /// Avatar URL at join time.
    pub user_avatar: Option<String>,
    /// When the user joined.
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// Build a participant entry for `identity`, joining now.
    pub fn from_identity(identity: &UserIdentity) -> Self {
        Self {
            user_id: identity.id,
            user_name: identity.display_name.clone(),
            user_avatar: identity.avatar_url.clone(),
            joined_at: Utc::now(),
        }
    }
}

/// A proposed membership that has not been answered yet.
///
/// When `invited_by == user_id` the entry is a self-initiated join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvite {
    /// User being invited.
    pub user_id: Uuid,
    /// User who proposed the membership.
    pub invited_by: Uuid,
    /// When the invite was created.
    pub invited_at: DateTime<Utc>,
}

impl PendingInvite {
    /// An invitation from `invited_by` to `user_id`.
    pub fn new(user_id: Uuid, invited_by: Uuid) -> Self {
        Self {
            user_id,
            invited_by,
            invited_at: Utc::now(),
        }
    }

    /// A join request raised by `user_id` themselves.
    pub fn join_request(user_id: Uuid) -> Self {
        Self::new(user_id, user_id)
    }

    /// Whether this entry was raised by the invited user.
    #[must_use]
    pub fn is_join_request(&self) -> bool {
        self.user_id == self.invited_by
    }
}

/// Persisted voice room record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Room ID, assigned by the store.
    pub room_id: Uuid,
    /// Participants in join order.
    pub participants: Vec<Participant>,
    /// Outstanding invites and join requests.
    pub pending_invites: Vec<PendingInvite>,
    /// False once the room emptied or was closed.
    pub is_active: bool,
    /// User who created the room.
    pub created_by: Uuid,
    /// When the room was created.
    pub created_at: DateTime<Utc>,
    /// Incremented on every successful update.
    pub version: u64,
}

/// Fields supplied when creating a room. The store assigns the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoom {
    /// Creator of the room.
    pub created_by: Uuid,
    /// Initial participants.
    pub participants: Vec<Participant>,
    /// Initial invites.
    #[serde(default)]
    pub pending_invites: Vec<PendingInvite>,
}

/// A single atomic mutation of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RoomOp {
    /// Append a participant and drop their pending invite.
    Join { participant: Participant },
    /// Remove oneself.
    Leave { user_id: Uuid },
    /// Remove another participant.
    Evict { user_id: Uuid },
    /// Add (or replace) a pending invite.
    Invite { invite: PendingInvite },
    /// Remove a pending invite.
    Withdraw { user_id: Uuid },
    /// Deactivate the room.
    Close,
}

/// A batch of operations applied atomically, optionally guarded by version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUpdate {
    /// Operations, applied in order.
    pub ops: Vec<RoomOp>,
    /// Reject the update unless the stored version matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

impl RoomUpdate {
    /// An unguarded update with a single operation.
    #[must_use]
    pub fn single(op: RoomOp) -> Self {
        Self {
            ops: vec![op],
            expected_version: None,
        }
    }

    /// Guard the update with an expected version.
    #[must_use]
    pub const fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

impl From<RoomOp> for RoomUpdate {
    fn from(op: RoomOp) -> Self {
        Self::single(op)
    }
}

impl Room {
    /// Whether `user_id` is a participant.
    #[must_use]
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    /// Participant IDs in join order.
    pub fn participant_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.participants.iter().map(|p| p.user_id)
    }

    /// The pending entry addressed to `user_id`, if any.
    #[must_use]
    pub fn invite_for(&self, user_id: Uuid) -> Option<&PendingInvite> {
        self.pending_invites.iter().find(|i| i.user_id == user_id)
    }

    /// Pending entries raised by the requesting users themselves.
    pub fn join_requests(&self) -> impl Iterator<Item = &PendingInvite> + '_ {
        self.pending_invites.iter().filter(|i| i.is_join_request())
    }

    /// Apply one operation in place.
    ///
    /// Cross-room checks (a user in at most one active room) are the
    /// caller's job; see [`crate::RoomTable`].
    pub fn apply(&mut self, op: &RoomOp) -> Result<()> {
        match op {
            RoomOp::Join { participant } => {
                self.ensure_active()?;
                self.pending_invites
                    .retain(|i| i.user_id != participant.user_id);
                if !self.has_participant(participant.user_id) {
                    self.participants.push(participant.clone());
                }
            }
            RoomOp::Leave { user_id } | RoomOp::Evict { user_id } => {
                self.participants.retain(|p| p.user_id != *user_id);
                if self.participants.is_empty() {
                    self.deactivate();
                }
            }
            RoomOp::Invite { invite } => {
                self.ensure_active()?;
                if self.has_participant(invite.user_id) {
                    return Err(Error::AlreadyParticipant(invite.user_id));
                }
                match self
                    .pending_invites
                    .iter_mut()
                    .find(|i| i.user_id == invite.user_id)
                {
                    Some(existing) => *existing = invite.clone(),
                    None => self.pending_invites.push(invite.clone()),
                }
            }
            RoomOp::Withdraw { user_id } => {
                self.pending_invites.retain(|i| i.user_id != *user_id);
            }
            RoomOp::Close => self.deactivate(),
        }
        Ok(())
    }

    /// Check the record-level invariants.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (i, p) in self.participants.iter().enumerate() {
            if self.participants[..i].iter().any(|q| q.user_id == p.user_id) {
                return Err(format!("participant {} listed twice", p.user_id));
            }
        }
        if let Some(invite) = self
            .pending_invites
            .iter()
            .find(|i| self.has_participant(i.user_id))
        {
            return Err(format!(
                "user {} is both participant and invited",
                invite.user_id
            ));
        }
        if self.is_active && self.participants.is_empty() {
            return Err("active room has no participants".into());
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active {
            Ok(())
        } else {
            Err(Error::RoomInactive(self.room_id))
        }
    }

    fn deactivate(&mut self) {
        self.is_active = false;
        self.pending_invites.clear();
    }
}

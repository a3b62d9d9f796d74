//! In-memory room table.
//!
//! Applies creates and updates with the cross-room invariant that a user is a
//! participant of at most one active room. Both the client's in-memory store
//! and the reference backend wrap one of these in a lock.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{NewRoom, Participant, PendingInvite, Room, RoomOp, RoomUpdate};

/// Deactivated rooms remembered so late updates get `RoomInactive`.
pub const MAX_RETIRED_ROOMS: usize = 256;

/// Active rooms keyed by ID, plus the most recently deactivated ones.
///
/// Older deactivated rooms are forgotten and report `RoomNotFound`.
#[derive(Debug, Clone)]
pub struct RoomTable {
    active: HashMap<Uuid, Room>,
    retired: HashMap<Uuid, Room>,
    retired_order: VecDeque<Uuid>,
    retired_capacity: usize,
}

impl Default for RoomTable {
    fn default() -> Self {
        Self::with_retired_capacity(MAX_RETIRED_ROOMS)
    }
}

impl RoomTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table remembering at most `capacity` deactivated rooms.
    #[must_use]
    pub fn with_retired_capacity(capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            retired: HashMap::new(),
            retired_order: VecDeque::new(),
            retired_capacity: capacity,
        }
    }

    /// Active rooms, oldest first.
    #[must_use]
    pub fn list_active(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.active.values().cloned().collect();
        rooms.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        rooms
    }

    /// Look up an active or recently deactivated room by ID.
    #[must_use]
    pub fn get(&self, room_id: Uuid) -> Option<&Room> {
        self.active
            .get(&room_id)
            .or_else(|| self.retired.get(&room_id))
    }

    /// The active room `user_id` participates in, if any.
    #[must_use]
    pub fn active_room_of(&self, user_id: Uuid) -> Option<&Room> {
        self.active.values().find(|r| r.has_participant(user_id))
    }

    /// Create a room, assigning its ID and bookkeeping fields.
    pub fn create(&mut self, new: NewRoom) -> Result<Room> {
        if new.participants.is_empty() {
            return Err(Error::EmptyRoom);
        }

        let mut participants = Vec::with_capacity(new.participants.len());
        for participant in new.participants {
            if let Some(existing) = self.active_room_of(participant.user_id) {
                return Err(Error::AlreadyInRoom {
                    user_id: participant.user_id,
                    room_id: existing.room_id,
                });
            }
            if !participants
                .iter()
                .any(|p: &Participant| p.user_id == participant.user_id)
            {
                participants.push(participant);
            }
        }

        let mut pending_invites = Vec::with_capacity(new.pending_invites.len());
        for invite in new.pending_invites {
            let is_participant = participants.iter().any(|p| p.user_id == invite.user_id);
            let is_duplicate = pending_invites
                .iter()
                .any(|i: &PendingInvite| i.user_id == invite.user_id);
            if !is_participant && !is_duplicate {
                pending_invites.push(invite);
            }
        }

        let room = Room {
            room_id: Uuid::now_v7(),
            participants,
            pending_invites,
            is_active: true,
            created_by: new.created_by,
            created_at: Utc::now(),
            version: 1,
        };
        self.active.insert(room.room_id, room.clone());

        debug!(room_id = %room.room_id, created_by = %room.created_by, "Room created");
        Ok(room)
    }

    /// Apply an update atomically. Either every op lands or none does.
    pub fn update(&mut self, room_id: Uuid, update: &RoomUpdate) -> Result<Room> {
        let current = self.get(room_id).ok_or(Error::RoomNotFound(room_id))?;

        if let Some(expected) = update.expected_version {
            if expected != current.version {
                return Err(Error::VersionConflict {
                    expected,
                    actual: current.version,
                });
            }
        }

        let mut next = current.clone();
        for op in &update.ops {
            if let RoomOp::Join { participant } = op {
                if let Some(other) = self.active_room_of(participant.user_id) {
                    if other.room_id != room_id {
                        return Err(Error::AlreadyInRoom {
                            user_id: participant.user_id,
                            room_id: other.room_id,
                        });
                    }
                }
            }
            next.apply(op)?;
        }

        if next != *current {
            next.version = current.version + 1;
            debug!(
                room_id = %room_id,
                version = next.version,
                participants = next.participants.len(),
                is_active = next.is_active,
                "Room updated"
            );
            self.store(next.clone());
        }
        Ok(next)
    }

    /// Put an updated room back, retiring it once deactivated.
    fn store(&mut self, room: Room) {
        let room_id = room.room_id;
        if room.is_active {
            self.active.insert(room_id, room);
            return;
        }

        self.active.remove(&room_id);
        if self.retired.insert(room_id, room).is_some() {
            return;
        }
        self.retired_order.push_back(room_id);
        while self.retired_order.len() > self.retired_capacity {
            if let Some(evicted) = self.retired_order.pop_front() {
                self.retired.remove(&evicted);
                debug!(room_id = %evicted, "Forgot deactivated room");
            }
        }
    }
}

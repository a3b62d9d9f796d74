//! Invite Workflow
//!
//! Proposing, answering, and requesting room membership. Everything goes
//! through the room store; there is no separate message channel.

use std::sync::Arc;

use huddle_common::{
    NewRoom, Participant, PendingInvite, Room, RoomOp, RoomUpdate, UserIdentity,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::store::{RoomStore, StoreError};

/// An invitation addressed to the local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InviteOffer {
    /// Room as seen when the invite was found.
    pub room: Room,
    pub invite: PendingInvite,
}

impl InviteOffer {
    pub const fn room_id(&self) -> Uuid {
        self.room.room_id
    }

    pub const fn invited_by(&self) -> Uuid {
        self.invite.invited_by
    }
}

/// First invitation to `user_id` across `rooms`.
///
/// Join requests raised by `user_id` are not invitations and are skipped, as
/// are rooms `user_id` already participates in.
pub fn find_pending_invite(rooms: &[Room], user_id: Uuid) -> Option<InviteOffer> {
    rooms
        .iter()
        .filter(|room| room.is_active && !room.has_participant(user_id))
        .find_map(|room| {
            room.invite_for(user_id)
                .filter(|invite| !invite.is_join_request())
                .map(|invite| InviteOffer {
                    room: room.clone(),
                    invite: invite.clone(),
                })
        })
}

/// The active room `user_id` participates in.
pub fn room_of(rooms: &[Room], user_id: Uuid) -> Option<&Room> {
    rooms
        .iter()
        .find(|room| room.is_active && room.has_participant(user_id))
}

/// Store-backed membership actions for one user.
#[derive(Clone)]
pub struct InviteWorkflow {
    identity: UserIdentity,
    store: Arc<dyn RoomStore>,
}

impl InviteWorkflow {
    pub fn new(identity: UserIdentity, store: Arc<dyn RoomStore>) -> Self {
        Self { identity, store }
    }

    pub const fn user_id(&self) -> Uuid {
        self.identity.id
    }

    /// Create a room with the local user as sole participant and `target` as
    /// sole pending invite.
    pub async fn propose_room(&self, target: Uuid) -> Result<Room, StoreError> {
        let room = self
            .store
            .create_room(NewRoom {
                created_by: self.identity.id,
                participants: vec![Participant::from_identity(&self.identity)],
                pending_invites: vec![PendingInvite::new(target, self.identity.id)],
            })
            .await?;

        info!(room_id = %room.room_id, target = %target, "Room proposed");
        Ok(room)
    }

    /// Invite `target` into a room the local user is already in.
    pub async fn invite_into(&self, room_id: Uuid, target: Uuid) -> Result<Room, StoreError> {
        let room = self
            .store
            .update_room(
                room_id,
                RoomOp::Invite {
                    invite: PendingInvite::new(target, self.identity.id),
                }
                .into(),
            )
            .await?;

        info!(room_id = %room_id, target = %target, "Invited into current room");
        Ok(room)
    }

    /// Join the offered room. The store drops our pending entry in the same
    /// update.
    pub async fn accept(&self, offer: &InviteOffer) -> Result<Room, StoreError> {
        let room = self
            .store
            .update_room(
                offer.room_id(),
                RoomOp::Join {
                    participant: Participant::from_identity(&self.identity),
                }
                .into(),
            )
            .await?;

        info!(room_id = %room.room_id, invited_by = %offer.invited_by(), "Invite accepted");
        Ok(room)
    }

    /// Remove our pending entry without joining.
    pub async fn decline(&self, offer: &InviteOffer) -> Result<Room, StoreError> {
        let room = self
            .store
            .update_room(
                offer.room_id(),
                RoomOp::Withdraw {
                    user_id: self.identity.id,
                }
                .into(),
            )
            .await?;

        info!(room_id = %room.room_id, invited_by = %offer.invited_by(), "Invite declined");
        Ok(room)
    }

    /// Ask to join the room `target` is in.
    ///
    /// `None` when `target` is in no active room, or when the local user is
    /// already in it or already invited to it.
    pub async fn request_join(&self, target: Uuid) -> Result<Option<Room>, StoreError> {
        let rooms = self.store.list_active_rooms().await?;
        let Some(room) = room_of(&rooms, target) else {
            info!(target = %target, "Target is not in a room, nothing to join");
            return Ok(None);
        };
        if room.has_participant(self.identity.id) || room.invite_for(self.identity.id).is_some()
        {
            return Ok(None);
        }

        let room = self
            .store
            .update_room(
                room.room_id,
                RoomUpdate::single(RoomOp::Invite {
                    invite: PendingInvite::join_request(self.identity.id),
                })
                .expecting(room.version),
            )
            .await?;

        info!(room_id = %room.room_id, target = %target, "Join requested");
        Ok(Some(room))
    }

    /// Turn `user_id`'s join request into an invitation from us.
    pub async fn approve(&self, room_id: Uuid, user_id: Uuid) -> Result<Room, StoreError> {
        let room = self.invite_into(room_id, user_id).await?;
        info!(room_id = %room_id, user_id = %user_id, "Join request approved");
        Ok(room)
    }

    /// Drop `user_id`'s join request.
    pub async fn deny(&self, room_id: Uuid, user_id: Uuid) -> Result<Room, StoreError> {
        let room = self
            .store
            .update_room(room_id, RoomOp::Withdraw { user_id }.into())
            .await?;

        info!(room_id = %room_id, user_id = %user_id, "Join request denied");
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRoomStore;

    fn workflow(store: &MemoryRoomStore, name: &str) -> InviteWorkflow {
        InviteWorkflow::new(
            UserIdentity::new(Uuid::new_v4(), name),
            Arc::new(store.clone()),
        )
    }

    #[tokio::test]
    async fn test_propose_then_accept() {
        let store = MemoryRoomStore::new();
        let alice = workflow(&store, "alice");
        let bob = workflow(&store, "bob");

        let room = alice.propose_room(bob.user_id()).await.unwrap();
        assert_eq!(room.participant_ids().collect::<Vec<_>>(), vec![alice.user_id()]);

        let rooms = store.list_active_rooms().await.unwrap();
        let offer = find_pending_invite(&rooms, bob.user_id()).unwrap();
        assert_eq!(offer.invited_by(), alice.user_id());

        let room = bob.accept(&offer).await.unwrap();
        assert_eq!(
            room.participant_ids().collect::<Vec<_>>(),
            vec![alice.user_id(), bob.user_id()]
        );
        assert!(room.pending_invites.is_empty());
    }

    #[tokio::test]
    async fn test_decline_leaves_room_untouched() {
        let store = MemoryRoomStore::new();
        let alice = workflow(&store, "alice");
        let bob = workflow(&store, "bob");
        alice.propose_room(bob.user_id()).await.unwrap();

        let rooms = store.list_active_rooms().await.unwrap();
        let offer = find_pending_invite(&rooms, bob.user_id()).unwrap();
        let room = bob.decline(&offer).await.unwrap();

        assert_eq!(room.participant_ids().collect::<Vec<_>>(), vec![alice.user_id()]);
        assert!(room.pending_invites.is_empty());
        assert!(room.is_active);
    }

    #[tokio::test]
    async fn test_join_request_is_not_an_invite() {
        let store = MemoryRoomStore::new();
        let alice = workflow(&store, "alice");
        let carol = workflow(&store, "carol");
        alice.propose_room(Uuid::new_v4()).await.unwrap();

        let room = carol.request_join(alice.user_id()).await.unwrap().unwrap();
        assert_eq!(room.join_requests().count(), 1);

        let rooms = store.list_active_rooms().await.unwrap();
        assert!(find_pending_invite(&rooms, carol.user_id()).is_none());

        alice.approve(room.room_id, carol.user_id()).await.unwrap();
        let rooms = store.list_active_rooms().await.unwrap();
        let offer = find_pending_invite(&rooms, carol.user_id()).unwrap();
        assert_eq!(offer.invited_by(), alice.user_id());
    }

    #[tokio::test]
    async fn test_request_join_without_target_room() {
        let store = MemoryRoomStore::new();
        let carol = workflow(&store, "carol");
        assert!(carol.request_join(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deny_removes_request() {
        let store = MemoryRoomStore::new();
        let alice = workflow(&store, "alice");
        let carol = workflow(&store, "carol");
        let room = alice.propose_room(Uuid::new_v4()).await.unwrap();
        carol.request_join(alice.user_id()).await.unwrap();

        let room = alice.deny(room.room_id, carol.user_id()).await.unwrap();
        assert!(room.invite_for(carol.user_id()).is_none());
    }
}

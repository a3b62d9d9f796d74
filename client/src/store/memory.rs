//! In-process store shared by every client in the same process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use huddle_common::{NewRoom, Room, RoomTable, RoomUpdate, SignalEnvelope, SignalMailbox};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::{RoomStore, SignalRelay, StoreError};

/// Room table and signal mailbox behind one handle.
///
/// Clones share state. Every mutation is broadcast to [`RoomStore::watch`]
/// subscribers.
#[derive(Clone)]
pub struct MemoryRoomStore {
    rooms: Arc<RwLock<RoomTable>>,
    mailbox: Arc<RwLock<SignalMailbox>>,
    changes: broadcast::Sender<()>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            rooms: Arc::new(RwLock::new(RoomTable::new())),
            mailbox: Arc::new(RwLock::new(SignalMailbox::default())),
            changes,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Transport`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fetch any room, active or not.
    pub async fn room(&self, room_id: Uuid) -> Option<Room> {
        self.rooms.read().await.get(room_id).cloned()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Transport("store offline".into()))
        }
    }

    fn notify(&self) {
        // No receivers is fine.
        let _ = self.changes.send(());
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn list_active_rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.check_available()?;
        Ok(self.rooms.read().await.list_active())
    }

    async fn create_room(&self, room: NewRoom) -> Result<Room, StoreError> {
        self.check_available()?;
        let room = self.rooms.write().await.create(room)?;
        self.notify();
        Ok(room)
    }

    async fn update_room(&self, room_id: Uuid, update: RoomUpdate) -> Result<Room, StoreError> {
        self.check_available()?;
        let room = self.rooms.write().await.update(room_id, &update)?;
        self.notify();
        Ok(room)
    }

    fn watch(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.changes.subscribe())
    }
}

#[async_trait]
impl SignalRelay for MemoryRoomStore {
    async fn send_signal(&self, envelope: SignalEnvelope) -> Result<(), StoreError> {
        self.check_available()?;
        self.mailbox.write().await.push(envelope);
        self.notify();
        Ok(())
    }

    async fn drain_signals(&self, user_id: Uuid) -> Result<Vec<SignalEnvelope>, StoreError> {
        self.check_available()?;
        Ok(self.mailbox.write().await.drain(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_common::{Participant, PendingInvite, RoomOp, SignalPayload, UserIdentity};

    fn new_room(creator: Uuid, invitee: Uuid) -> NewRoom {
        NewRoom {
            created_by: creator,
            participants: vec![Participant::from_identity(&UserIdentity::new(creator, "a"))],
            pending_invites: vec![PendingInvite::new(invitee, creator)],
        }
    }

    #[tokio::test]
    async fn test_mutations_notify_watchers() {
        let store = MemoryRoomStore::new();
        let mut watch = store.watch().unwrap();

        store
            .create_room(new_room(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();

        assert!(watch.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_rejections_are_typed() {
        let store = MemoryRoomStore::new();
        let result = store
            .update_room(Uuid::new_v4(), RoomOp::Close.into())
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Rejected(huddle_common::Error::RoomNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_offline_store_fails_every_call() {
        let store = MemoryRoomStore::new();
        store.set_available(false);

        assert!(matches!(
            store.list_active_rooms().await,
            Err(StoreError::Transport(_))
        ));
        assert!(store.drain_signals(Uuid::new_v4()).await.is_err());

        store.set_available(true);
        assert!(store.list_active_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signals_round_trip_through_mailbox() {
        let store = MemoryRoomStore::new();
        let to = Uuid::new_v4();
        let envelope = SignalEnvelope {
            from: Uuid::new_v4(),
            to,
            room_id: Uuid::new_v4(),
            payload: SignalPayload::Offer { sdp: "v=0".into() },
        };

        store.send_signal(envelope.clone()).await.unwrap();

        assert_eq!(store.drain_signals(to).await.unwrap(), vec![envelope]);
        assert!(store.drain_signals(to).await.unwrap().is_empty());
    }
}

//! Room Coordinator
//!
//! Composition root of the voice room subsystem. A single actor task owns all
//! local session state (current room, local stream, peer sessions, pending
//! invite) and processes control commands, poll results, and transport events
//! one at a time. [`RoomCoordinator`] is the cloneable handle the host UI
//! talks to.
//!
//! Control methods never return errors. A failure is logged and the action
//! becomes a no-op; the UI reads the absence of the expected state from
//! [`RoomCoordinator::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use huddle_common::{PendingInvite, Room, RoomOp, UserIdentity};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{CaptureManager, LocalStream, MediaDevices};
use crate::config::ClientConfig;
use crate::invite::{InviteOffer, InviteWorkflow};
use crate::peer::{PeerSessionManager, PeerSummary, RemoteStreamInfo};
use crate::poller::{PollEvent, PollIntervals, RoomPoller};
use crate::rtc::{PeerConnector, PeerEvent, RtcConnector};
use crate::store::{HttpRoomStore, RoomStore, SignalRelay, StoreError};

/// Queued control commands.
const COMMAND_QUEUE: usize = 32;
/// Queued poll results.
const POLL_QUEUE: usize = 64;

/// Public state of the subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    pub user_id: Uuid,
    pub current_room: Option<Room>,
    pub pending_invite: Option<InviteOffer>,
    /// Join requests waiting in the current room.
    pub join_requests: Vec<PendingInvite>,
    pub remote_streams: Vec<RemoteStreamInfo>,
    pub peers: Vec<PeerSummary>,
    pub mic_enabled: bool,
    pub has_local_stream: bool,
}

impl RoomSnapshot {
    fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            current_room: None,
            pending_invite: None,
            join_requests: Vec::new(),
            remote_streams: Vec::new(),
            peers: Vec::new(),
            mic_enabled: true,
            has_local_stream: false,
        }
    }

    pub const fn in_room(&self) -> bool {
        self.current_room.is_some()
    }

    pub fn room_id(&self) -> Option<Uuid> {
        self.current_room.as_ref().map(|r| r.room_id)
    }

    /// IDs of peers with an open session, sorted.
    pub fn peer_ids(&self) -> Vec<Uuid> {
        self.peers.iter().map(|p| p.peer_id).collect()
    }
}

/// External collaborators of a coordinator.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RoomStore>,
    pub relay: Arc<dyn SignalRelay>,
    pub devices: Arc<dyn MediaDevices>,
    pub connector: Arc<dyn PeerConnector>,
}

#[derive(Debug)]
enum Action {
    CreateRoom(Uuid),
    AcceptInvite,
    DeclineInvite,
    RequestJoinRoom(Uuid),
    LeaveRoom,
    ToggleMic,
    ToggleParticipantAudio(Uuid),
    ApproveJoinRequest(Uuid),
    DenyJoinRequest(Uuid),
    EvictParticipant(Uuid),
}

struct Command {
    action: Action,
    done: oneshot::Sender<()>,
}

/// Handle to a running coordinator.
///
/// Clones share the same actor. Dropping every handle shuts it down.
#[derive(Clone)]
pub struct RoomCoordinator {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<RoomSnapshot>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RoomCoordinator {
    /// Start a coordinator for `identity` and begin polling.
    pub fn spawn(identity: UserIdentity, with: Collaborators, config: &ClientConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (poll_tx, poll_rx) = mpsc::channel(POLL_QUEUE);
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(RoomSnapshot::empty(identity.id));
        let cancel = CancellationToken::new();
        let epoch = Arc::new(AtomicU64::new(0));

        let capture = CaptureManager::new(with.devices);
        let poller_cancel = cancel.child_token();
        let poller = RoomPoller::new(
            identity.id,
            with.store.clone(),
            with.relay.clone(),
            epoch.clone(),
            poll_tx,
        )
        .spawn(PollIntervals::from(config), poller_cancel.clone());

        let actor = Actor {
            user_id: identity.id,
            invites: InviteWorkflow::new(identity.clone(), with.store.clone()),
            store: with.store,
            peers: PeerSessionManager::new(
                identity.id,
                with.connector,
                with.relay,
                capture.clone(),
                peer_tx,
            ),
            capture,
            current_room: None,
            pending_leave: None,
            local_stream: None,
            pending_invite: None,
            mic_enabled: true,
            epoch,
            snapshot: snapshot_tx,
            poller_cancel,
            poller: Some(poller),
        };

        info!(user_id = %identity.id, "Room coordinator started");
        let task = tokio::spawn(actor.run(commands_rx, poll_rx, peer_rx, cancel.clone()));

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Start a coordinator against the HTTP backend with WebRTC transport.
    pub fn connect(
        identity: UserIdentity,
        devices: Arc<dyn MediaDevices>,
        config: &ClientConfig,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(HttpRoomStore::new(config).context("Failed to create store client")?);
        let connector =
            Arc::new(RtcConnector::new(&config.ice_servers).context("Failed to initialize WebRTC")?);
        Ok(Self::spawn(
            identity,
            Collaborators {
                store: store.clone(),
                relay: store,
                devices,
                connector,
            },
            config,
        ))
    }

    /// Acquire media and create a room inviting `target`.
    ///
    /// Already in a room: invite `target` into it instead.
    pub async fn create_room(&self, target: Uuid) {
        self.send(Action::CreateRoom(target)).await;
    }

    /// Join the room of the pending invite.
    pub async fn accept_invite(&self) {
        self.send(Action::AcceptInvite).await;
    }

    /// Drop the pending invite without joining.
    pub async fn decline_invite(&self) {
        self.send(Action::DeclineInvite).await;
    }

    /// Ask to join the room `target` is in.
    pub async fn request_join_room(&self, target: Uuid) {
        self.send(Action::RequestJoinRoom(target)).await;
    }

    /// Stop media, close every peer session, and leave the current room.
    pub async fn leave_room(&self) {
        self.send(Action::LeaveRoom).await;
    }

    /// Enable or disable the microphone track without stopping capture.
    pub async fn toggle_mic(&self) {
        self.send(Action::ToggleMic).await;
    }

    /// Mute or unmute playback of one peer locally.
    pub async fn toggle_participant_audio(&self, user_id: Uuid) {
        self.send(Action::ToggleParticipantAudio(user_id)).await;
    }

    /// Convert a join request into an invitation from us.
    pub async fn approve_join_request(&self, user_id: Uuid) {
        self.send(Action::ApproveJoinRequest(user_id)).await;
    }

    /// Withdraw a join request.
    pub async fn deny_join_request(&self, user_id: Uuid) {
        self.send(Action::DenyJoinRequest(user_id)).await;
    }

    /// Remove another participant from the current room.
    pub async fn evict_participant(&self, user_id: Uuid) {
        self.send(Action::EvictParticipant(user_id)).await;
    }

    /// Current public state.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver updated after every processed event.
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot.clone()
    }

    /// Stop polling, release the local stream, close every peer session, and
    /// wait for the actor to finish. Later calls return immediately.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Room coordinator task ended abnormally");
            }
        }
    }

    async fn send(&self, action: Action) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command { action, done }).await.is_err() {
            debug!("Room coordinator stopped, command dropped");
            return;
        }
        let _ = wait.await;
    }
}

struct Actor {
    user_id: Uuid,
    store: Arc<dyn RoomStore>,
    invites: InviteWorkflow,
    capture: CaptureManager,
    peers: PeerSessionManager,
    current_room: Option<Room>,
    /// Room we left locally whose `Leave` the store has not confirmed.
    pending_leave: Option<Uuid>,
    local_stream: Option<LocalStream>,
    pending_invite: Option<InviteOffer>,
    mic_enabled: bool,
    epoch: Arc<AtomicU64>,
    snapshot: watch::Sender<RoomSnapshot>,
    poller_cancel: CancellationToken,
    poller: Option<JoinHandle<()>>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut polls: mpsc::Receiver<PollEvent>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(event) = peer_events.recv() => self.peers.handle_event(event).await,
                command = commands.recv() => {
                    let Some(Command { action, done }) = command else {
                        debug!(user_id = %self.user_id, "All coordinator handles dropped");
                        break;
                    };
                    self.handle_action(action).await;
                    self.publish();
                    let _ = done.send(());
                    continue;
                }
                Some(event) = polls.recv() => self.handle_poll(event).await,
            }
            self.publish();
        }

        self.teardown().await;
    }

    /// Stop polling, then stop capture, then close every session.
    async fn teardown(&mut self) {
        self.poller_cancel.cancel();
        if let Some(poller) = self.poller.take() {
            let _ = poller.await;
        }
        self.release_stream();
        self.peers.close_all().await;
        self.publish();
        info!(user_id = %self.user_id, "Room coordinator stopped");
    }

    async fn handle_action(&mut self, action: Action) {
        debug!(user_id = %self.user_id, ?action, "Handling control action");
        match action {
            Action::CreateRoom(target) => self.create_room(target).await,
            Action::AcceptInvite => self.accept_invite().await,
            Action::DeclineInvite => self.decline_invite().await,
            Action::RequestJoinRoom(target) => self.request_join_room(target).await,
            Action::LeaveRoom => self.leave_room().await,
            Action::ToggleMic => self.toggle_mic(),
            Action::ToggleParticipantAudio(user_id) => {
                let enabled = self.peers.toggle_audio(user_id);
                debug!(peer_id = %user_id, enabled, "Participant audio toggled");
            }
            Action::ApproveJoinRequest(user_id) => self.approve_join_request(user_id).await,
            Action::DenyJoinRequest(user_id) => self.deny_join_request(user_id).await,
            Action::EvictParticipant(user_id) => self.evict_participant(user_id).await,
        }
    }

    async fn create_room(&mut self, target: Uuid) {
        if target == self.user_id {
            warn!(user_id = %self.user_id, "Cannot invite yourself");
            return;
        }

        if let Some(room_id) = self.current_room.as_ref().map(|r| r.room_id) {
            match self.invites.invite_into(room_id, target).await {
                Ok(room) => self.adopt_room(room).await,
                Err(e) => warn!(room_id = %room_id, target = %target, error = %e, "Failed to invite into current room"),
            }
            return;
        }

        self.settle_pending_leave().await;
        let Some(acquired) = self.ensure_local_stream().await else {
            return;
        };
        match self.invites.propose_room(target).await {
            Ok(room) => {
                info!(room_id = %room.room_id, target = %target, "Room created");
                self.adopt_room(room).await;
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Failed to create room");
                if acquired {
                    self.release_stream();
                }
            }
        }
    }

    async fn accept_invite(&mut self) {
        let Some(offer) = self.pending_invite.clone() else {
            warn!(user_id = %self.user_id, "No pending invite to accept");
            return;
        };

        match self.current_room.as_ref().map(|r| r.room_id) {
            Some(room_id) if room_id == offer.room_id() => {
                self.pending_invite = None;
                return;
            }
            Some(_) => self.leave_room().await,
            None => self.settle_pending_leave().await,
        }

        let Some(acquired) = self.ensure_local_stream().await else {
            return;
        };
        match self.invites.accept(&offer).await {
            Ok(room) => {
                self.pending_invite = None;
                info!(room_id = %room.room_id, "Joined room");
                self.adopt_room(room).await;
            }
            Err(e) => {
                warn!(room_id = %offer.room_id(), error = %e, "Failed to accept invite");
                if acquired {
                    self.release_stream();
                }
                self.forget_invite_if_rejected(&e);
            }
        }
    }

    async fn decline_invite(&mut self) {
        let Some(offer) = self.pending_invite.clone() else {
            warn!(user_id = %self.user_id, "No pending invite to decline");
            return;
        };
        match self.invites.decline(&offer).await {
            Ok(_) => {
                self.bump_epoch();
                self.pending_invite = None;
            }
            Err(e) => {
                warn!(room_id = %offer.room_id(), error = %e, "Failed to decline invite");
                self.forget_invite_if_rejected(&e);
            }
        }
    }

    async fn request_join_room(&mut self, target: Uuid) {
        self.settle_pending_leave().await;
        match self.invites.request_join(target).await {
            Ok(Some(_)) => self.bump_epoch(),
            Ok(None) => {}
            Err(e) => warn!(target = %target, error = %e, "Failed to request join"),
        }
    }

    /// Release media and sessions, then remove ourselves from the room.
    ///
    /// Local state is cleared even if the store write fails. The leave is
    /// then retried whenever a poll still reports us in that room.
    async fn leave_room(&mut self) {
        self.release_stream();
        self.peers.close_all().await;

        let Some(room) = self.current_room.take() else {
            debug!(user_id = %self.user_id, "Not in a room");
            return;
        };
        self.peers.reconcile(None, None).await;
        self.pending_leave = Some(room.room_id);
        self.send_leave(room.room_id).await;
    }

    /// Write `Leave` for `room_id`, keeping `pending_leave` until the store
    /// confirms or refuses it.
    async fn send_leave(&mut self, room_id: Uuid) {
        let result = self
            .store
            .update_room(
                room_id,
                RoomOp::Leave {
                    user_id: self.user_id,
                }
                .into(),
            )
            .await;
        self.bump_epoch();

        match result {
            Ok(updated) => {
                self.pending_leave = None;
                info!(
                    room_id = %room_id,
                    remaining = updated.participants.len(),
                    is_active = updated.is_active,
                    "Left room"
                );
            }
            Err(e) if e.is_rejection() => {
                self.pending_leave = None;
                debug!(room_id = %room_id, error = %e, "Leave refused, room already gone");
            }
            Err(e) => warn!(room_id = %room_id, error = %e, "Failed to leave room in store, will retry"),
        }
    }

    /// Retry an unconfirmed leave before writing to the store on our behalf.
    async fn settle_pending_leave(&mut self) {
        if let Some(room_id) = self.pending_leave {
            self.send_leave(room_id).await;
        }
    }

    fn toggle_mic(&mut self) {
        self.mic_enabled = !self.mic_enabled;
        if let Some(stream) = &self.local_stream {
            stream.set_enabled(self.mic_enabled);
        }
        debug!(enabled = self.mic_enabled, "Microphone toggled");
    }

    async fn approve_join_request(&mut self, user_id: Uuid) {
        let Some(room_id) = self.current_room.as_ref().map(|r| r.room_id) else {
            warn!(user_id = %user_id, "Not in a room, cannot approve join request");
            return;
        };
        match self.invites.approve(room_id, user_id).await {
            Ok(room) => self.adopt_room(room).await,
            Err(e) => warn!(room_id = %room_id, user_id = %user_id, error = %e, "Failed to approve join request"),
        }
    }

    async fn deny_join_request(&mut self, user_id: Uuid) {
        let Some(room_id) = self.current_room.as_ref().map(|r| r.room_id) else {
            warn!(user_id = %user_id, "Not in a room, cannot deny join request");
            return;
        };
        match self.invites.deny(room_id, user_id).await {
            Ok(room) => self.adopt_room(room).await,
            Err(e) => warn!(room_id = %room_id, user_id = %user_id, error = %e, "Failed to deny join request"),
        }
    }

    async fn evict_participant(&mut self, user_id: Uuid) {
        if user_id == self.user_id {
            warn!("Use leave_room to remove yourself");
            return;
        }
        let Some(room_id) = self.current_room.as_ref().map(|r| r.room_id) else {
            warn!(user_id = %user_id, "Not in a room, cannot evict");
            return;
        };
        match self
            .store
            .update_room(room_id, RoomOp::Evict { user_id }.into())
            .await
        {
            Ok(room) => {
                info!(room_id = %room_id, user_id = %user_id, "Participant evicted");
                self.adopt_room(room).await;
            }
            Err(e) => warn!(room_id = %room_id, user_id = %user_id, error = %e, "Failed to evict participant"),
        }
    }

    async fn handle_poll(&mut self, event: PollEvent) {
        match event {
            PollEvent::Room { epoch, room } => {
                if self.is_stale(epoch) {
                    debug!(epoch, "Discarding stale room poll");
                    return;
                }
                match room {
                    Some(room) if self.pending_leave == Some(room.room_id) => {
                        debug!(room_id = %room.room_id, "Still listed in a room we left, retrying leave");
                        self.send_leave(room.room_id).await;
                    }
                    Some(room) => {
                        self.pending_leave = None;
                        self.current_room = Some(room);
                        self.reconcile().await;
                    }
                    None => {
                        self.pending_leave = None;
                        if let Some(room) = self.current_room.take() {
                            info!(room_id = %room.room_id, "No longer in room, releasing resources");
                            self.release_stream();
                            self.reconcile().await;
                        }
                    }
                }
            }
            PollEvent::Invite { epoch, invite } => {
                if self.is_stale(epoch) {
                    debug!(epoch, "Discarding stale invite poll");
                    return;
                }
                let known = self.pending_invite.as_ref().map(InviteOffer::room_id);
                if let Some(offer) = invite.as_ref().filter(|o| Some(o.room_id()) != known) {
                    info!(room_id = %offer.room_id(), invited_by = %offer.invited_by(), "Invite received");
                }
                self.pending_invite = invite;
            }
            PollEvent::Signals(signals) => {
                for envelope in signals {
                    self.peers.handle_signal(envelope).await;
                }
            }
        }
    }

    /// Acquire the local stream if not already held.
    ///
    /// `Some(true)` when newly acquired, `None` when media is unavailable.
    async fn ensure_local_stream(&mut self) -> Option<bool> {
        if self.local_stream.is_some() {
            return Some(false);
        }
        let stream = self.capture.init_local_audio().await?;
        stream.set_enabled(self.mic_enabled);
        self.local_stream = Some(stream);
        Some(true)
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.local_stream.take() {
            stream.stop();
        }
    }

    /// Take a room returned by our own write as current state.
    async fn adopt_room(&mut self, room: Room) {
        self.bump_epoch();
        self.current_room = Some(room);
        self.reconcile().await;
    }

    async fn reconcile(&mut self) {
        self.peers
            .reconcile(self.current_room.as_ref(), self.local_stream.as_ref())
            .await;
    }

    fn forget_invite_if_rejected(&mut self, e: &StoreError) {
        if e.is_rejection() {
            self.pending_invite = None;
        }
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn is_stale(&self, epoch: u64) -> bool {
        epoch < self.epoch.load(Ordering::SeqCst)
    }

    fn publish(&self) {
        let next = RoomSnapshot {
            user_id: self.user_id,
            current_room: self.current_room.clone(),
            pending_invite: self.pending_invite.clone(),
            join_requests: self
                .current_room
                .as_ref()
                .map(|r| r.join_requests().cloned().collect())
                .unwrap_or_default(),
            remote_streams: self.peers.remote_streams(),
            peers: self.peers.summaries(),
            mic_enabled: self.mic_enabled,
            has_local_stream: self.local_stream.is_some(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

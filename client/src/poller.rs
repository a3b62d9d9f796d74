//! Room State Poller
//!
//! Polls the store for the local user's room, invites addressed to them, and
//! their signal mailbox, and feeds the results to the coordinator as one
//! ordered event stream.
//!
//! Room and invite results carry the mutation epoch read when the fetch
//! started. The coordinator bumps the epoch after each of its own writes and
//! drops results from older epochs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use huddle_common::{Room, SignalEnvelope};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::invite::{find_pending_invite, room_of, InviteOffer};
use crate::store::{RoomStore, SignalRelay};

/// Result of one poll.
#[derive(Debug)]
pub enum PollEvent {
    /// The active room containing the local user, if any.
    Room { epoch: u64, room: Option<Room> },
    /// The first invitation addressed to the local user, if any.
    Invite {
        epoch: u64,
        invite: Option<InviteOffer>,
    },
    /// Signals drained from the local user's mailbox.
    Signals(Vec<SignalEnvelope>),
}

/// Poll periods.
#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub room: Duration,
    pub invite: Duration,
    pub signal: Duration,
}

impl From<&ClientConfig> for PollIntervals {
    fn from(config: &ClientConfig) -> Self {
        Self {
            room: config.room_poll_interval,
            invite: config.invite_poll_interval,
            signal: config.signal_poll_interval,
        }
    }
}

/// Background poller for one user.
pub struct RoomPoller {
    user_id: Uuid,
    store: Arc<dyn RoomStore>,
    relay: Arc<dyn SignalRelay>,
    epoch: Arc<AtomicU64>,
    events: mpsc::Sender<PollEvent>,
}

impl RoomPoller {
    pub fn new(
        user_id: Uuid,
        store: Arc<dyn RoomStore>,
        relay: Arc<dyn SignalRelay>,
        epoch: Arc<AtomicU64>,
        events: mpsc::Sender<PollEvent>,
    ) -> Self {
        Self {
            user_id,
            store,
            relay,
            epoch,
            events,
        }
    }

    /// Run until `cancel` fires or the coordinator stops listening.
    pub fn spawn(self, intervals: PollIntervals, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(intervals, cancel).await })
    }

    async fn run(self, intervals: PollIntervals, cancel: CancellationToken) {
        let mut room_tick = interval(intervals.room);
        let mut invite_tick = interval(intervals.invite);
        let mut signal_tick = interval(intervals.signal);
        for tick in [&mut room_tick, &mut invite_tick, &mut signal_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        let mut changes = self.store.watch();

        debug!(user_id = %self.user_id, push = changes.is_some(), "Room poller started");

        loop {
            let delivered = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                change = next_change(&mut changes) => {
                    match change {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => self.poll_all().await,
                        Err(broadcast::error::RecvError::Closed) => {
                            changes = None;
                            true
                        }
                    }
                }
                _ = room_tick.tick() => self.poll_room().await,
                _ = invite_tick.tick() => self.poll_invites().await,
                _ = signal_tick.tick() => self.poll_signals().await,
            };
            if !delivered {
                break;
            }
        }

        debug!(user_id = %self.user_id, "Room poller stopped");
    }

    async fn poll_all(&self) -> bool {
        self.poll_room().await && self.poll_invites().await && self.poll_signals().await
    }

    /// Returns false once the coordinator is gone.
    async fn poll_room(&self) -> bool {
        let epoch = self.epoch.load(Ordering::SeqCst);
        match self.store.list_active_rooms().await {
            Ok(rooms) => {
                let room = room_of(&rooms, self.user_id).cloned();
                self.deliver(PollEvent::Room { epoch, room }).await
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Room poll failed");
                true
            }
        }
    }

    async fn poll_invites(&self) -> bool {
        let epoch = self.epoch.load(Ordering::SeqCst);
        match self.store.list_active_rooms().await {
            Ok(rooms) => {
                let invite = find_pending_invite(&rooms, self.user_id);
                self.deliver(PollEvent::Invite { epoch, invite }).await
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Invite poll failed");
                true
            }
        }
    }

    async fn poll_signals(&self) -> bool {
        match self.relay.drain_signals(self.user_id).await {
            Ok(signals) if signals.is_empty() => true,
            Ok(signals) => self.deliver(PollEvent::Signals(signals)).await,
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Signal poll failed");
                true
            }
        }
    }

    async fn deliver(&self, event: PollEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

async fn next_change(
    changes: &mut Option<broadcast::Receiver<()>>,
) -> Result<(), broadcast::error::RecvError> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

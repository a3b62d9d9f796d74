//! Peer Session Manager
//!
//! Keeps exactly one peer session per other participant of the current room:
//! one connection carrying the shared local tracks, and at most one playback
//! sink fed by every inbound track of that peer.
//!
//! Sessions are opened and closed by [`PeerSessionManager::reconcile`] on every
//! room change, and closed immediately when their transport reports a loss.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use huddle_common::{is_offerer, Room, SignalEnvelope, SignalPayload};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{CaptureManager, LocalStream, PlaybackSink, RemoteAudio};
use crate::rtc::{PeerConnector, PeerEvent, PeerEventKind, PeerLink, PeerRequest};
use crate::store::SignalRelay;

mod state;

pub use state::{PeerInput, PeerState, PeerStateError};

/// Envelopes kept per peer that has no session yet.
const MAX_STASHED_SIGNALS: usize = 64;

/// Public view of one peer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    pub peer_id: Uuid,
    pub state: PeerState,
    /// Whether this side made the offer.
    pub offerer: bool,
}

/// Public view of one peer's inbound audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteStreamInfo {
    pub peer_id: Uuid,
    pub track_ids: Vec<String>,
    pub audio_enabled: bool,
}

struct PeerSession {
    session_id: u64,
    state: PeerState,
    offerer: bool,
    link: Arc<dyn PeerLink>,
    sink: Option<PlaybackSink>,
    track_ids: Vec<String>,
    remote_description: bool,
    pending_candidates: Vec<String>,
}

/// Owns every peer session of the local user.
pub struct PeerSessionManager {
    local_user: Uuid,
    connector: Arc<dyn PeerConnector>,
    relay: Arc<dyn SignalRelay>,
    capture: CaptureManager,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    room_id: Option<Uuid>,
    sessions: HashMap<Uuid, PeerSession>,
    stash: HashMap<Uuid, VecDeque<SignalEnvelope>>,
    audio_enabled: HashMap<Uuid, bool>,
    next_session_id: u64,
}

impl PeerSessionManager {
    /// Create a manager. Transport events for its sessions arrive on
    /// `events_tx` and must be fed back through [`Self::handle_event`].
    pub fn new(
        local_user: Uuid,
        connector: Arc<dyn PeerConnector>,
        relay: Arc<dyn SignalRelay>,
        capture: CaptureManager,
        events_tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            local_user,
            connector,
            relay,
            capture,
            events_tx,
            room_id: None,
            sessions: HashMap::new(),
            stash: HashMap::new(),
            audio_enabled: HashMap::new(),
            next_session_id: 0,
        }
    }

    /// Bring the session set in line with `room`'s participants.
    ///
    /// Removals run before additions, so a peer that left and rejoined between
    /// two calls gets a fresh session.
    pub async fn reconcile(&mut self, room: Option<&Room>, stream: Option<&LocalStream>) {
        let room_id = room.map(|r| r.room_id);
        if room_id != self.room_id {
            if !self.sessions.is_empty() {
                debug!(from = ?self.room_id, to = ?room_id, "Room changed, closing all peer sessions");
            }
            self.close_all().await;
            self.room_id = room_id;
        }

        let desired: BTreeSet<Uuid> = room
            .map(|r| r.participant_ids().filter(|id| *id != self.local_user).collect())
            .unwrap_or_default();
        let existing: BTreeSet<Uuid> = self.sessions.keys().copied().collect();

        for peer_id in existing.difference(&desired) {
            self.close(*peer_id).await;
        }
        for peer_id in desired.difference(&existing) {
            self.open(*peer_id, stream).await;
        }

        debug!(
            room_id = ?self.room_id,
            sessions = self.sessions.len(),
            "Peer sessions reconciled"
        );
    }

    /// Open a session to `peer_id`, attaching every track of `stream`.
    ///
    /// On failure no session is recorded; the next reconcile retries.
    pub async fn open(&mut self, peer_id: Uuid, stream: Option<&LocalStream>) {
        if self.sessions.contains_key(&peer_id) || peer_id == self.local_user {
            return;
        }
        let Some(room_id) = self.room_id else {
            return;
        };

        self.next_session_id += 1;
        let session_id = self.next_session_id;
        let request = PeerRequest {
            peer_id,
            session_id,
            tracks: stream.map(|s| s.tracks().to_vec()).unwrap_or_default(),
        };

        let link = match self.connector.connect(request, self.events_tx.clone()).await {
            Ok(link) => link,
            Err(e) => {
                warn!(peer_id = %peer_id, error = %e, "Failed to open peer connection");
                return;
            }
        };

        let offerer = is_offerer(self.local_user, peer_id);
        if offerer {
            if let Err(e) = self.send_offer(room_id, peer_id, link.as_ref()).await {
                warn!(peer_id = %peer_id, error = %e, "Failed to send offer");
                close_link(peer_id, link.as_ref()).await;
                return;
            }
        }

        self.sessions.insert(
            peer_id,
            PeerSession {
                session_id,
                state: PeerState::Connecting,
                offerer,
                link,
                sink: None,
                track_ids: Vec::new(),
                remote_description: false,
                pending_candidates: Vec::new(),
            },
        );
        info!(peer_id = %peer_id, session_id, offerer, "Peer session opened");

        if let Some(stashed) = self.stash.remove(&peer_id) {
            debug!(peer_id = %peer_id, count = stashed.len(), "Replaying stashed signals");
            for envelope in stashed {
                self.apply_signal(envelope).await;
            }
        }
    }

    /// Close the session to `peer_id`. Safe to call for unknown or already
    /// closed peers.
    ///
    /// Returns the final state of the closed session, `None` if there was none.
    pub async fn close(&mut self, peer_id: Uuid) -> Option<PeerState> {
        let Some(mut session) = self.sessions.remove(&peer_id) else {
            debug!(peer_id = %peer_id, "No peer session to close");
            return None;
        };

        let last_state = session.state;
        match last_state.apply(PeerInput::Close) {
            Ok(next) => session.state = next,
            Err(e) => warn!(peer_id = %peer_id, error = %e, "Unexpected peer state on close"),
        }
        close_link(peer_id, session.link.as_ref()).await;
        if let Some(mut sink) = session.sink.take() {
            sink.stop();
        }

        info!(
            peer_id = %peer_id,
            session_id = session.session_id,
            from = ?last_state,
            to = ?session.state,
            "Peer session closed"
        );
        Some(session.state)
    }

    /// Close every session and forget stashed signals.
    pub async fn close_all(&mut self) {
        let peers: Vec<Uuid> = self.sessions.keys().copied().collect();
        for peer_id in peers {
            self.close(peer_id).await;
        }
        self.stash.clear();
    }

    /// Handle a transport event from one of our connections.
    pub async fn handle_event(&mut self, event: PeerEvent) {
        let PeerEvent {
            peer_id,
            session_id,
            kind,
        } = event;

        let Some(session) = self.sessions.get_mut(&peer_id) else {
            debug!(peer_id = %peer_id, session_id, "Event for closed peer session ignored");
            return;
        };
        if session.session_id != session_id {
            debug!(peer_id = %peer_id, session_id, "Event from stale connection ignored");
            return;
        }

        match kind {
            PeerEventKind::StateChanged(transport) => {
                let Some(input) = PeerInput::from_transport(transport) else {
                    return;
                };
                match session.state.apply(input) {
                    Ok(PeerState::Disconnected) => {
                        info!(peer_id = %peer_id, ?transport, "Peer transport lost, closing session");
                        session.state = PeerState::Disconnected;
                        self.close(peer_id).await;
                    }
                    Ok(next) => {
                        if next != session.state {
                            info!(peer_id = %peer_id, "Peer connected");
                        }
                        session.state = next;
                    }
                    Err(e) => debug!(peer_id = %peer_id, error = %e, "Ignoring transport state"),
                }
            }
            PeerEventKind::IceCandidate(candidate) => {
                let Some(room_id) = self.room_id else {
                    return;
                };
                let envelope = SignalEnvelope {
                    from: self.local_user,
                    to: peer_id,
                    room_id,
                    payload: SignalPayload::Candidate { candidate },
                };
                if let Err(e) = self.relay.send_signal(envelope).await {
                    warn!(peer_id = %peer_id, error = %e, "Failed to send ICE candidate");
                }
            }
            PeerEventKind::RemoteTrack(remote) => self.attach_remote(peer_id, remote),
        }
    }

    fn attach_remote(&mut self, peer_id: Uuid, remote: RemoteAudio) {
        let enabled = self.audio_enabled(peer_id);
        let Some(session) = self.sessions.get_mut(&peer_id) else {
            return;
        };
        let sink = session.sink.get_or_insert_with(|| {
            let sink = self.capture.open_playback(peer_id);
            sink.set_enabled(enabled);
            sink
        });
        session.track_ids.push(remote.track_id.clone());
        sink.attach(remote);
        debug!(peer_id = %peer_id, tracks = session.track_ids.len(), "Remote audio attached");
    }

    /// Route a signaling envelope addressed to us.
    ///
    /// Envelopes for another room are dropped. Envelopes from a peer without a
    /// session are kept until that session opens.
    pub async fn handle_signal(&mut self, envelope: SignalEnvelope) {
        if envelope.to != self.local_user || Some(envelope.room_id) != self.room_id {
            debug!(
                from = %envelope.from,
                room_id = %envelope.room_id,
                kind = envelope.payload.kind(),
                "Dropping signal for another room"
            );
            return;
        }

        if !self.sessions.contains_key(&envelope.from) {
            let stash = self.stash.entry(envelope.from).or_default();
            if matches!(envelope.payload, SignalPayload::Offer { .. }) {
                // A new offer restarts negotiation.
                stash.clear();
            }
            if stash.len() >= MAX_STASHED_SIGNALS {
                stash.pop_front();
            }
            debug!(from = %envelope.from, kind = envelope.payload.kind(), "Stashing signal until session opens");
            stash.push_back(envelope);
            return;
        }

        self.apply_signal(envelope).await;
    }

    async fn apply_signal(&mut self, envelope: SignalEnvelope) {
        let peer_id = envelope.from;
        let Some(room_id) = self.room_id else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&peer_id) else {
            return;
        };
        let kind = envelope.payload.kind();

        let result = match envelope.payload {
            SignalPayload::Offer { sdp } if !session.offerer => {
                match session.link.accept_offer(&sdp).await {
                    Ok(answer) => {
                        session.remote_description = true;
                        let reply = SignalEnvelope {
                            from: self.local_user,
                            to: peer_id,
                            room_id,
                            payload: SignalPayload::Answer { sdp: answer },
                        };
                        flush_candidates(peer_id, session).await;
                        self.relay
                            .send_signal(reply)
                            .await
                            .map_err(|e| e.to_string())
                    }
                    Err(e) => Err(e.to_string()),
                }
            }
            SignalPayload::Answer { sdp } if session.offerer => {
                match session.link.accept_answer(&sdp).await {
                    Ok(()) => {
                        session.remote_description = true;
                        flush_candidates(peer_id, session).await;
                        Ok(())
                    }
                    Err(e) => Err(e.to_string()),
                }
            }
            SignalPayload::Candidate { candidate } => {
                if session.remote_description {
                    session
                        .link
                        .add_ice_candidate(&candidate)
                        .await
                        .map_err(|e| e.to_string())
                } else {
                    session.pending_candidates.push(candidate);
                    Ok(())
                }
            }
            SignalPayload::Offer { .. } | SignalPayload::Answer { .. } => {
                warn!(peer_id = %peer_id, kind, offerer = session.offerer, "Unexpected signal for role");
                Ok(())
            }
        };

        match result {
            Ok(()) => debug!(peer_id = %peer_id, kind, "Signal applied"),
            Err(e) => warn!(peer_id = %peer_id, kind, error = %e, "Failed to apply signal"),
        }
    }

    async fn send_offer(
        &self,
        room_id: Uuid,
        peer_id: Uuid,
        link: &dyn PeerLink,
    ) -> Result<(), String> {
        let sdp = link.create_offer().await.map_err(|e| e.to_string())?;
        self.relay
            .send_signal(SignalEnvelope {
                from: self.local_user,
                to: peer_id,
                room_id,
                payload: SignalPayload::Offer { sdp },
            })
            .await
            .map_err(|e| e.to_string())
    }

    /// Mute or unmute playback of one peer. Kept across session rebuilds.
    pub fn set_audio_enabled(&mut self, peer_id: Uuid, enabled: bool) {
        self.audio_enabled.insert(peer_id, enabled);
        if let Some(sink) = self.sessions.get(&peer_id).and_then(|s| s.sink.as_ref()) {
            sink.set_enabled(enabled);
        }
    }

    /// Flip playback of one peer, returning the new setting.
    pub fn toggle_audio(&mut self, peer_id: Uuid) -> bool {
        let enabled = !self.audio_enabled(peer_id);
        self.set_audio_enabled(peer_id, enabled);
        enabled
    }

    pub fn audio_enabled(&self, peer_id: Uuid) -> bool {
        self.audio_enabled.get(&peer_id).copied().unwrap_or(true)
    }

    /// Peers with an open session, sorted.
    pub fn peer_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn summaries(&self) -> Vec<PeerSummary> {
        let mut peers: Vec<PeerSummary> = self
            .sessions
            .iter()
            .map(|(peer_id, s)| PeerSummary {
                peer_id: *peer_id,
                state: s.state,
                offerer: s.offerer,
            })
            .collect();
        peers.sort_by_key(|p| p.peer_id);
        peers
    }

    /// Peers whose audio is being received.
    pub fn remote_streams(&self) -> Vec<RemoteStreamInfo> {
        let mut streams: Vec<RemoteStreamInfo> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.sink.is_some())
            .map(|(peer_id, s)| RemoteStreamInfo {
                peer_id: *peer_id,
                track_ids: s.track_ids.clone(),
                audio_enabled: self.audio_enabled(*peer_id),
            })
            .collect();
        streams.sort_by_key(|s| s.peer_id);
        streams
    }

    /// Number of signals waiting for a session to open.
    pub fn stashed_signals(&self) -> usize {
        self.stash.values().map(VecDeque::len).sum()
    }
}

async fn flush_candidates(peer_id: Uuid, session: &mut PeerSession) {
    for candidate in std::mem::take(&mut session.pending_candidates) {
        if let Err(e) = session.link.add_ice_candidate(&candidate).await {
            warn!(peer_id = %peer_id, error = %e, "Failed to add queued ICE candidate");
        }
    }
}

async fn close_link(peer_id: Uuid, link: &dyn PeerLink) {
    if let Err(e) = link.close().await {
        error!(peer_id = %peer_id, error = %e, "Failed to close peer connection");
    }
}

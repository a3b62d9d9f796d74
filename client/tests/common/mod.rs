//! Shared fakes for coordinator integration tests.
//!
//! Coordinators run against one [`MemoryRoomStore`] with fake media and a
//! fake peer connector whose links complete negotiation instantly.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use huddle_client::audio::{LocalAudioTrack, RemoteAudio};
use huddle_client::rtc::{
    ConnectionState, PeerConnector, PeerEvent, PeerEventKind, PeerLink, PeerRequest, WebRtcError,
};
use huddle_client::{
    AudioConstraints, ClientConfig, Collaborators, LocalStream, MediaDevices, MediaError,
    MemoryRoomStore, PlaybackSink, RoomCoordinator, RoomSnapshot,
};
use huddle_common::UserIdentity;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Upper bound on virtual time spent waiting for a condition.
pub const WAIT: Duration = Duration::from_secs(60);

/// Microphone that can be told to refuse access.
#[derive(Default)]
pub struct FakeMedia {
    deny: AtomicBool,
    captures: AtomicUsize,
}

impl FakeMedia {
    pub fn deny(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn capture_audio(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<LocalStream, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, _stop_rx) = oneshot::channel();
        Ok(LocalStream::new(
            vec![LocalAudioTrack::opus("fake")],
            *constraints,
            Some(stop_tx),
        ))
    }

    fn open_playback(&self, peer_id: Uuid) -> Result<PlaybackSink, MediaError> {
        Ok(PlaybackSink::detached(peer_id))
    }
}

struct LinkEntry {
    session_id: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
}

/// Connector whose links connect as soon as negotiation completes.
#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<HashMap<Uuid, LinkEntry>>,
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Report the latest connection to `peer_id` as failed.
    pub fn fail(&self, peer_id: Uuid) {
        let session_id = self.session_id(peer_id).expect("no connection to peer");
        self.report(peer_id, session_id, ConnectionState::Failed);
    }

    /// Report a state for a specific session of `peer_id`.
    pub fn report(&self, peer_id: Uuid, session_id: u64, state: ConnectionState) {
        let links = self.links.lock().unwrap();
        let entry = links.get(&peer_id).expect("no connection to peer");
        let _ = entry.events.send(PeerEvent {
            peer_id,
            session_id,
            kind: PeerEventKind::StateChanged(state),
        });
    }

    pub fn session_id(&self, peer_id: Uuid) -> Option<u64> {
        self.links
            .lock()
            .unwrap()
            .get(&peer_id)
            .map(|e| e.session_id)
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        request: PeerRequest,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>, WebRtcError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.links.lock().unwrap().insert(
            request.peer_id,
            LinkEntry {
                session_id: request.session_id,
                events: events.clone(),
            },
        );

        let link = FakeLink {
            peer_id: request.peer_id,
            session_id: request.session_id,
            events,
            closed: AtomicBool::new(false),
            closes: self.closes.clone(),
        };
        link.emit(PeerEventKind::IceCandidate(
            r#"{"candidate":"candidate:1 1 udp 1 127.0.0.1 9 typ host"}"#.into(),
        ));
        Ok(Arc::new(link))
    }
}

struct FakeLink {
    peer_id: Uuid,
    session_id: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
    closed: AtomicBool,
    closes: Arc<AtomicUsize>,
}

impl FakeLink {
    fn emit(&self, kind: PeerEventKind) {
        let _ = self.events.send(PeerEvent {
            peer_id: self.peer_id,
            session_id: self.session_id,
            kind,
        });
    }

    fn connected(&self) {
        let (_packets_tx, packets) = mpsc::channel(1);
        self.emit(PeerEventKind::StateChanged(ConnectionState::Connected));
        self.emit(PeerEventKind::RemoteTrack(RemoteAudio {
            track_id: format!("audio-{}", self.peer_id),
            packets,
        }));
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_offer(&self) -> Result<String, WebRtcError> {
        Ok(format!("offer-to-{}", self.peer_id))
    }

    async fn accept_offer(&self, sdp: &str) -> Result<String, WebRtcError> {
        if !sdp.starts_with("offer-to-") {
            return Err(WebRtcError::SdpError(sdp.into()));
        }
        self.connected();
        Ok(format!("answer-to-{}", self.peer_id))
    }

    async fn accept_answer(&self, sdp: &str) -> Result<(), WebRtcError> {
        if !sdp.starts_with("answer-to-") {
            return Err(WebRtcError::SdpError(sdp.into()));
        }
        self.connected();
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: &str) -> Result<(), WebRtcError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), WebRtcError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// One user with their own coordinator and fakes.
pub struct TestClient {
    pub id: Uuid,
    pub coordinator: RoomCoordinator,
    pub media: Arc<FakeMedia>,
    pub connector: Arc<FakeConnector>,
}

impl TestClient {
    pub fn spawn(store: &MemoryRoomStore, name: &str) -> Self {
        let identity = UserIdentity::new(Uuid::new_v4(), name);
        let media = Arc::new(FakeMedia::default());
        let connector = Arc::new(FakeConnector::default());
        let coordinator = RoomCoordinator::spawn(
            identity.clone(),
            Collaborators {
                store: Arc::new(store.clone()),
                relay: Arc::new(store.clone()),
                devices: media.clone(),
                connector: connector.clone(),
            },
            &ClientConfig::default(),
        );
        Self {
            id: identity.id,
            coordinator,
            media,
            connector,
        }
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.coordinator.snapshot()
    }

    /// Wait until the published state satisfies `condition`.
    pub async fn wait_until(
        &self,
        mut condition: impl FnMut(&RoomSnapshot) -> bool,
    ) -> RoomSnapshot {
        let mut rx = self.coordinator.subscribe();
        let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| condition(s)))
            .await
            .expect("timed out waiting for coordinator state")
            .expect("coordinator stopped")
            .clone();
        snapshot
    }

    /// Wait until peer sessions are exactly `peers`, all connected and
    /// receiving audio.
    pub async fn wait_for_peers(&self, peers: &[Uuid]) -> RoomSnapshot {
        let mut expected = peers.to_vec();
        expected.sort();
        self.wait_until(|s| {
            let receiving: Vec<Uuid> = s.remote_streams.iter().map(|r| r.peer_id).collect();
            s.peer_ids() == expected
                && receiving == expected
                && s.peers
                    .iter()
                    .all(|p| p.state == huddle_client::PeerState::Connected)
        })
        .await
    }
}

//! Peer Transport
//!
//! One WebRTC peer connection per remote participant. The session manager
//! only sees the [`PeerConnector`] and [`PeerLink`] seams; [`RtcConnector`] is
//! the webrtc-rs implementation.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::{LocalAudioTrack, RemoteAudio};

mod connector;

pub use connector::{RtcConnector, RtcLink};

/// WebRTC errors
#[derive(Error, Debug)]
pub enum WebRtcError {
    #[error("WebRTC API error: {0}")]
    ApiError(String),
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),
    #[error("SDP error: {0}")]
    SdpError(String),
    #[error("ICE error: {0}")]
    IceError(String),
    #[error("Track error: {0}")]
    TrackError(String),
}

/// Transport-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// What happened on a peer connection.
#[derive(Debug)]
pub enum PeerEventKind {
    StateChanged(ConnectionState),
    /// Locally gathered candidate, JSON-encoded `RTCIceCandidateInit`.
    IceCandidate(String),
    RemoteTrack(RemoteAudio),
}

/// Event from one peer connection, tagged with the session that created it.
#[derive(Debug)]
pub struct PeerEvent {
    pub peer_id: Uuid,
    pub session_id: u64,
    pub kind: PeerEventKind,
}

/// Parameters for a new connection.
#[derive(Debug, Clone)]
pub struct PeerRequest {
    pub peer_id: Uuid,
    pub session_id: u64,
    /// Local tracks to send. Empty means receive-only.
    pub tracks: Vec<LocalAudioTrack>,
}

/// An open connection to one peer.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create and apply a local offer, returning its SDP.
    async fn create_offer(&self) -> Result<String, WebRtcError>;

    /// Apply a remote offer and return the local answer SDP.
    async fn accept_offer(&self, sdp: &str) -> Result<String, WebRtcError>;

    /// Apply the remote answer to our offer.
    async fn accept_answer(&self, sdp: &str) -> Result<(), WebRtcError>;

    /// Add a remote candidate (JSON-encoded `RTCIceCandidateInit`).
    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), WebRtcError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), WebRtcError>;
}

/// Opens peer connections.
///
/// Every event of the returned link is delivered on `events`, tagged with
/// `request.peer_id` and `request.session_id`.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        request: PeerRequest,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>, WebRtcError>;
}

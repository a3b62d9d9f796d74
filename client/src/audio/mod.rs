//! Audio Input/Output
//!
//! Local microphone capture shared by every peer connection, and one playback
//! sink per remote peer.
//!
//! The actual device backend sits behind [`MediaDevices`]. With the
//! `native-audio` feature, [`native::CpalDevices`] captures and plays through
//! cpal with opus encoding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[cfg(feature = "native-audio")]
pub mod native;

/// Audio configuration constants
pub const SAMPLE_RATE: u32 = 48000;
pub const CHANNELS: u16 = 2;
pub const FRAME_SIZE_MS: usize = 20;
pub const FRAME_SIZE: usize = (SAMPLE_RATE as usize * FRAME_SIZE_MS) / 1000; // 960 samples per channel

/// Buffered inbound frames per playback sink.
const PLAYBACK_QUEUE: usize = 100;

/// Audio errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No input device available")]
    NoInputDevice,
    #[error("No output device available")]
    NoOutputDevice,
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Failed to get device config: {0}")]
    ConfigError(String),
    #[error("Failed to build stream: {0}")]
    StreamError(String),
    #[error("Opus codec error: {0}")]
    CodecError(String),
    #[error("Track write failed: {0}")]
    TrackError(String),
}

/// Processing requested for the capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Opus codec used for every local and remote audio track.
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: SAMPLE_RATE,
        channels: CHANNELS,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// One captured audio track.
///
/// Cheap to clone; every clone writes into the same WebRTC track, which is
/// what lets a single capture feed every peer connection in the room.
#[derive(Clone)]
pub struct LocalAudioTrack {
    rtp: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalAudioTrack {
    /// Create an opus track for `stream_id`.
    pub fn opus(stream_id: &str) -> Self {
        Self {
            rtp: Arc::new(TrackLocalStaticSample::new(
                opus_capability(),
                "audio".to_string(),
                stream_id.to_string(),
            )),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Track ID.
    pub fn id(&self) -> &str {
        self.rtp.id()
    }

    /// The WebRTC track attached to peer connections.
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        self.rtp.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Write one encoded frame. Dropped while the track is disabled.
    pub async fn write_frame(&self, data: Bytes) -> Result<(), MediaError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.rtp
            .write_sample(&Sample {
                data,
                duration: Duration::from_millis(FRAME_SIZE_MS as u64),
                ..Default::default()
            })
            .await
            .map_err(|e| MediaError::TrackError(e.to_string()))
    }
}

impl std::fmt::Debug for LocalAudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAudioTrack")
            .field("id", &self.id())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Exclusively owned microphone capture.
///
/// Dropping the stream stops capture.
#[derive(Debug)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalAudioTrack>,
    constraints: AudioConstraints,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl LocalStream {
    /// Wrap tracks fed by a capture task that exits when `stop_tx` fires or
    /// is dropped.
    pub fn new(
        tracks: Vec<LocalAudioTrack>,
        constraints: AudioConstraints,
        stop_tx: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
            constraints,
            stop_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalAudioTrack] {
        &self.tracks
    }

    pub const fn constraints(&self) -> AudioConstraints {
        self.constraints
    }

    /// Enable or disable every track without stopping capture.
    pub fn set_enabled(&self, enabled: bool) {
        for track in &self.tracks {
            track.set_enabled(enabled);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tracks.iter().any(LocalAudioTrack::is_enabled)
    }

    /// Stop capture. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
            info!(stream_id = %self.id, "Local audio stream stopped");
        }
    }

    pub const fn is_stopped(&self) -> bool {
        self.stop_tx.is_none()
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Inbound audio from one remote track, as raw opus payloads.
#[derive(Debug)]
pub struct RemoteAudio {
    pub track_id: String,
    pub packets: mpsc::Receiver<Bytes>,
}

/// Playback of one remote peer's audio.
///
/// Every inbound track of that peer is attached to the same sink.
#[derive(Debug)]
pub struct PlaybackSink {
    peer_id: Uuid,
    enabled: Arc<AtomicBool>,
    frames_tx: mpsc::Sender<Bytes>,
    stop_tx: Option<oneshot::Sender<()>>,
    forwarders: Vec<JoinHandle<()>>,
    // Keeps the queue open for sinks without an output device.
    _discard: Option<mpsc::Receiver<Bytes>>,
    stopped: bool,
}

impl PlaybackSink {
    /// Sink feeding `frames_tx`, played by a task that exits when `stop_tx`
    /// fires or is dropped.
    pub fn new(
        peer_id: Uuid,
        frames_tx: mpsc::Sender<Bytes>,
        stop_tx: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            peer_id,
            enabled: Arc::new(AtomicBool::new(true)),
            frames_tx,
            stop_tx,
            forwarders: Vec::new(),
            _discard: None,
            stopped: false,
        }
    }

    /// Sink with no output device. Frames are accepted and discarded.
    pub fn detached(peer_id: Uuid) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(PLAYBACK_QUEUE);
        let mut sink = Self::new(peer_id, frames_tx, None);
        sink._discard = Some(frames_rx);
        sink
    }

    pub const fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    /// Start forwarding a remote track into this sink.
    pub fn attach(&mut self, remote: RemoteAudio) {
        if self.stopped {
            return;
        }
        let RemoteAudio {
            track_id,
            mut packets,
        } = remote;
        let enabled = self.enabled.clone();
        let frames_tx = self.frames_tx.clone();
        let peer_id = self.peer_id;

        debug!(peer_id = %peer_id, track_id = %track_id, "Attaching remote track to sink");
        self.forwarders.push(tokio::spawn(async move {
            while let Some(frame) = packets.recv().await {
                if !enabled.load(Ordering::Relaxed) {
                    continue;
                }
                match frames_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            debug!(peer_id = %peer_id, track_id = %track_id, "Remote track ended");
        }));
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Stop playback and detach every track. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        debug!(peer_id = %self.peer_id, "Playback sink stopped");
    }

    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn attached_tracks(&self) -> usize {
        self.forwarders.len()
    }
}

impl Drop for PlaybackSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Audio device backend.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open an audio-only capture stream.
    async fn capture_audio(&self, constraints: &AudioConstraints)
        -> Result<LocalStream, MediaError>;

    /// Open a playback sink for one remote peer.
    fn open_playback(&self, peer_id: Uuid) -> Result<PlaybackSink, MediaError>;
}

/// Acquires the local capture stream on behalf of the coordinator.
///
/// Never retries: a denied or missing device is reported once and the
/// caller decides whether to ask again.
#[derive(Clone)]
pub struct CaptureManager {
    devices: Arc<dyn MediaDevices>,
    constraints: AudioConstraints,
}

impl CaptureManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            constraints: AudioConstraints::default(),
        }
    }

    /// Request a capture stream with echo cancellation, noise suppression,
    /// and automatic gain control. `None` when the device is denied or
    /// unavailable.
    pub async fn init_local_audio(&self) -> Option<LocalStream> {
        match self.devices.capture_audio(&self.constraints).await {
            Ok(stream) => {
                info!(stream_id = %stream.id(), tracks = stream.tracks().len(), "Local audio acquired");
                Some(stream)
            }
            Err(e) => {
                warn!(error = %e, "Failed to acquire local audio");
                None
            }
        }
    }

    /// Open a playback sink, falling back to a detached one when no output
    /// device can be opened.
    pub fn open_playback(&self, peer_id: Uuid) -> PlaybackSink {
        match self.devices.open_playback(peer_id) {
            Ok(sink) => sink,
            Err(e) => {
                warn!(peer_id = %peer_id, error = %e, "Failed to open playback, audio from peer will be discarded");
                PlaybackSink::detached(peer_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraints_default_enables_processing() {
        let c = AudioConstraints::default();
        assert!(c.echo_cancellation);
        assert!(c.noise_suppression);
        assert!(c.auto_gain_control);
    }

    #[test]
    fn test_stream_toggle_keeps_capture() {
        let (tx, mut rx) = oneshot::channel();
        let stream = LocalStream::new(
            vec![LocalAudioTrack::opus("s")],
            AudioConstraints::default(),
            Some(tx),
        );

        stream.set_enabled(false);
        assert!(!stream.is_enabled());
        assert!(!stream.is_stopped());
        assert!(rx.try_recv().is_err());

        stream.set_enabled(true);
        assert!(stream.is_enabled());
    }

    #[test]
    fn test_stream_stop_is_idempotent() {
        let (tx, mut rx) = oneshot::channel();
        let mut stream = LocalStream::new(vec![], AudioConstraints::default(), Some(tx));

        stream.stop();
        stream.stop();

        assert!(stream.is_stopped());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_sink_forwards_only_while_enabled() {
        let (frames_tx, mut frames_rx) = mpsc::channel(8);
        let mut sink = PlaybackSink::new(Uuid::new_v4(), frames_tx, None);
        let (packets_tx, packets) = mpsc::channel(8);
        sink.attach(RemoteAudio {
            track_id: "t".into(),
            packets,
        });

        packets_tx.send(Bytes::from_static(b"a")).await.unwrap();
        assert_eq!(frames_rx.recv().await.unwrap(), Bytes::from_static(b"a"));

        sink.set_enabled(false);
        packets_tx.send(Bytes::from_static(b"b")).await.unwrap();
        sink.set_enabled(true);
        packets_tx.send(Bytes::from_static(b"c")).await.unwrap();
        // "b" may or may not have been read before re-enabling; "c" always arrives.
        let next = frames_rx.recv().await.unwrap();
        let next = if next == Bytes::from_static(b"b") {
            frames_rx.recv().await.unwrap()
        } else {
            next
        };
        assert_eq!(next, Bytes::from_static(b"c"));
    }

    #[tokio::test]
    async fn test_sink_stop_is_idempotent() {
        let mut sink = PlaybackSink::detached(Uuid::new_v4());
        let (_packets_tx, packets) = mpsc::channel(1);
        sink.attach(RemoteAudio {
            track_id: "t".into(),
            packets,
        });

        sink.stop();
        sink.stop();

        assert!(sink.is_stopped());
        assert_eq!(sink.attached_tracks(), 0);
    }
}

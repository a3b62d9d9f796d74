//! webrtc-rs peer connections.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine, APIBuilder,
        API,
    },
    ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::{RTCRtpCodecParameters, RTPCodecType},
        rtp_transceiver_direction::RTCRtpTransceiverDirection,
        RTCRtpTransceiverInit,
    },
    track::track_local::TrackLocal,
    track::track_remote::TrackRemote,
};

use super::{
    ConnectionState, PeerConnector, PeerEvent, PeerEventKind, PeerLink, PeerRequest, WebRtcError,
};
use crate::audio::{opus_capability, LocalAudioTrack, RemoteAudio};
use crate::config::IceServerConfig;

/// Buffered inbound RTP payloads per remote track.
const REMOTE_TRACK_QUEUE: usize = 100;

/// Opens webrtc-rs peer connections with the configured ICE servers.
pub struct RtcConnector {
    api: Arc<API>,
    config: RTCConfiguration,
}

impl RtcConnector {
    /// Build the WebRTC API with the Opus codec registered.
    pub fn new(ice_servers: &[IceServerConfig]) -> Result<Self, WebRtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: 111,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| WebRtcError::ApiError(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WebRtcError::ApiError(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!(ice_servers = ice_servers.len(), "WebRTC connector initialized");

        Ok(Self {
            api: Arc::new(api),
            config: RTCConfiguration {
                ice_servers: ice_servers.iter().map(Into::into).collect(),
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(
        &self,
        request: PeerRequest,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>, WebRtcError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.config.clone())
                .await
                .map_err(|e| WebRtcError::PeerConnectionError(e.to_string()))?,
        );

        setup_event_handlers(&pc, request.peer_id, request.session_id, events);

        if let Err(e) = attach_or_close(&pc, &request.tracks).await {
            warn!(peer_id = %request.peer_id, error = %e, "Failed to attach media to peer connection");
            return Err(e);
        }

        debug!(
            peer_id = %request.peer_id,
            session_id = request.session_id,
            tracks = request.tracks.len(),
            "Peer connection created"
        );

        Ok(Arc::new(RtcLink {
            peer_id: request.peer_id,
            pc,
        }))
    }
}

/// Attach `tracks` (or a receive-only transceiver when there are none),
/// closing `pc` if that fails.
async fn attach_or_close(
    pc: &Arc<RTCPeerConnection>,
    tracks: &[LocalAudioTrack],
) -> Result<(), WebRtcError> {
    let result = attach_media(pc, tracks).await;
    if result.is_err() {
        if let Err(e) = pc.close().await {
            warn!(error = %e, "Failed to close peer connection");
        }
    }
    result
}

async fn attach_media(
    pc: &Arc<RTCPeerConnection>,
    tracks: &[LocalAudioTrack],
) -> Result<(), WebRtcError> {
    if tracks.is_empty() {
        pc.add_transceiver_from_kind(
            RTPCodecType::Audio,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(|e| WebRtcError::TrackError(e.to_string()))?;
    }

    for track in tracks {
        let sender = pc
            .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| WebRtcError::TrackError(e.to_string()))?;

        // Drain RTCP so interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
    }
    Ok(())
}

fn setup_event_handlers(
    pc: &RTCPeerConnection,
    peer_id: Uuid,
    session_id: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let emit = move |kind: PeerEventKind| {
        // The session manager may already be gone during teardown.
        let _ = events.send(PeerEvent {
            peer_id,
            session_id,
            kind,
        });
    };

    let on_candidate = emit.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let emit = on_candidate.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate
                .to_json()
                .map_err(|e| e.to_string())
                .and_then(|init| serde_json::to_string(&init).map_err(|e| e.to_string()))
            {
                Ok(json) => emit(PeerEventKind::IceCandidate(json)),
                Err(e) => warn!(peer_id = %peer_id, error = %e, "Failed to encode ICE candidate"),
            }
        })
    }));

    let on_state = emit.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let emit = on_state.clone();
        Box::pin(async move {
            let state = match s {
                RTCPeerConnectionState::Connected => ConnectionState::Connected,
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                    ConnectionState::Disconnected
                }
                RTCPeerConnectionState::Failed => ConnectionState::Failed,
                _ => ConnectionState::Connecting,
            };
            debug!(peer_id = %peer_id, state = ?s, "Peer connection state changed");
            emit(PeerEventKind::StateChanged(state));
        })
    }));

    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let emit = emit.clone();
            Box::pin(async move {
                info!(
                    peer_id = %peer_id,
                    kind = %track.kind(),
                    codec = %track.codec().capability.mime_type,
                    "Remote track received"
                );

                let (packets_tx, packets) = mpsc::channel(REMOTE_TRACK_QUEUE);
                emit(PeerEventKind::RemoteTrack(RemoteAudio {
                    track_id: track.id(),
                    packets,
                }));
                spawn_rtp_reader(peer_id, track, packets_tx);
            })
        },
    ));
}

/// Forward RTP payloads from a remote track until it ends or the sink goes.
fn spawn_rtp_reader(
    peer_id: Uuid,
    track: Arc<TrackRemote>,
    packets_tx: mpsc::Sender<bytes::Bytes>,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500]; // MTU size
        loop {
            match track.read(&mut buf).await {
                Ok((packet, _attributes)) => {
                    if packets_tx.send(packet.payload).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(peer_id = %peer_id, error = %e, "Remote track read ended");
                    break;
                }
            }
        }
    });
}

/// A webrtc-rs connection to one peer.
pub struct RtcLink {
    peer_id: Uuid,
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn create_offer(&self) -> Result<String, WebRtcError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;

        debug!(peer_id = %self.peer_id, "Local offer set");
        Ok(offer.sdp)
    }

    async fn accept_offer(&self, sdp: &str) -> Result<String, WebRtcError> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;

        debug!(peer_id = %self.peer_id, "Remote offer answered");
        Ok(answer.sdp)
    }

    async fn accept_answer(&self, sdp: &str) -> Result<(), WebRtcError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;

        debug!(peer_id = %self.peer_id, "Remote answer set");
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), WebRtcError> {
        let init: RTCIceCandidateInit =
            serde_json::from_str(candidate).map_err(|e| WebRtcError::IceError(e.to_string()))?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| WebRtcError::IceError(e.to_string()))
    }

    async fn close(&self) -> Result<(), WebRtcError> {
        self.pc
            .close()
            .await
            .map_err(|e| WebRtcError::PeerConnectionError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_creation() {
        let connector = RtcConnector::new(&[IceServerConfig::default()]);
        assert!(connector.is_ok());
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_links() {
        let connector = RtcConnector::new(&[]).unwrap();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        let offerer = connector
            .connect(
                PeerRequest {
                    peer_id: Uuid::new_v4(),
                    session_id: 1,
                    tracks: vec![LocalAudioTrack::opus("a")],
                },
                events_tx.clone(),
            )
            .await
            .unwrap();
        let answerer = connector
            .connect(
                PeerRequest {
                    peer_id: Uuid::new_v4(),
                    session_id: 2,
                    tracks: vec![],
                },
                events_tx,
            )
            .await
            .unwrap();

        let offer = offerer.create_offer().await.unwrap();
        assert!(offer.contains("opus"));
        let answer = answerer.accept_offer(&offer).await.unwrap();
        offerer.accept_answer(&answer).await.unwrap();

        offerer.close().await.unwrap();
        answerer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_candidate_is_rejected() {
        let connector = RtcConnector::new(&[]).unwrap();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let link = connector
            .connect(
                PeerRequest {
                    peer_id: Uuid::new_v4(),
                    session_id: 1,
                    tracks: vec![],
                },
                events_tx,
            )
            .await
            .unwrap();

        let result = link.add_ice_candidate("not json").await;
        assert!(matches!(result, Err(WebRtcError::IceError(_))));
    }

    #[tokio::test]
    async fn test_failed_media_setup_closes_connection() {
        let connector = RtcConnector::new(&[]).unwrap();
        let pc = Arc::new(
            connector
                .api
                .new_peer_connection(connector.config.clone())
                .await
                .unwrap(),
        );
        pc.close().await.unwrap();

        for tracks in [vec![], vec![LocalAudioTrack::opus("a")]] {
            let result = attach_or_close(&pc, &tracks).await;
            assert!(matches!(result, Err(WebRtcError::TrackError(_))));
            assert_eq!(pc.connection_state(), RTCPeerConnectionState::Closed);
        }
    }
}

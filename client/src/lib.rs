//! Huddle Client Library
//!
//! Ad-hoc multi-party voice rooms over a full WebRTC mesh. A host application
//! starts one [`RoomCoordinator`] per signed-in user and drives it through its
//! control methods; everything else (polling the room store, signaling,
//! opening and closing peer sessions, local capture) happens behind it.

pub mod audio;
pub mod config;
pub mod coordinator;
pub mod invite;
pub mod logging;
pub mod peer;
pub mod poller;
pub mod rtc;
pub mod store;

pub use audio::{AudioConstraints, LocalStream, MediaDevices, MediaError, PlaybackSink};
pub use config::{ClientConfig, IceServerConfig};
pub use coordinator::{Collaborators, RoomCoordinator, RoomSnapshot};
pub use invite::InviteOffer;
pub use peer::{PeerState, PeerSummary, RemoteStreamInfo};
pub use rtc::{PeerConnector, PeerLink, RtcConnector};
pub use store::{HttpRoomStore, MemoryRoomStore, RoomStore, SignalRelay, StoreError};

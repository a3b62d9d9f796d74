//! Peer Session State
//!
//! Explicit transitions for one peer session's lifecycle.

use serde::Serialize;
use thiserror::Error;

use crate::rtc::ConnectionState;

/// Lifecycle of one peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    /// Connection created, negotiation in progress.
    Connecting,
    /// Media path established.
    Connected,
    /// Transport lost. The session is torn down right away.
    Disconnected,
    /// Closed locally. Terminal.
    Closed,
}

/// Inputs that drive [`PeerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerInput {
    /// Transport reported connected.
    TransportConnected,
    /// Transport reported disconnected or failed.
    TransportLost,
    /// Local close.
    Close,
}

impl PeerInput {
    /// Map a transport state report to an input. `Connecting` carries no
    /// transition.
    pub const fn from_transport(state: ConnectionState) -> Option<Self> {
        match state {
            ConnectionState::Connected => Some(Self::TransportConnected),
            ConnectionState::Disconnected | ConnectionState::Failed => Some(Self::TransportLost),
            ConnectionState::Connecting => None,
        }
    }
}

impl PeerState {
    /// Apply an input to derive the next state
    pub fn apply(self, input: PeerInput) -> Result<Self, PeerStateError> {
        match (self, input) {
            (Self::Closed, _) => Err(PeerStateError::AlreadyClosed),

            (_, PeerInput::Close) => Ok(Self::Closed),

            (Self::Connecting | Self::Connected, PeerInput::TransportConnected) => {
                Ok(Self::Connected)
            }

            (Self::Connecting | Self::Connected, PeerInput::TransportLost) => {
                Ok(Self::Disconnected)
            }

            (state, input) => Err(PeerStateError::InvalidTransition { state, input }),
        }
    }
}

/// Peer state errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerStateError {
    #[error("Peer session already closed")]
    AlreadyClosed,
    #[error("Invalid peer state transition: {state:?} + {input:?}")]
    InvalidTransition { state: PeerState, input: PeerInput },
}

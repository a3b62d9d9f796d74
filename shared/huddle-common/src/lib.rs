//! Huddle Common Library
//!
//! Shared room model, room operations, and signaling types used by both the
//! client coordinator and the reference backend.

pub mod error;
pub mod mailbox;
pub mod protocol;
pub mod table;
pub mod types;

pub use error::{Error, Result};
pub use mailbox::SignalMailbox;
pub use protocol::{is_offerer, SignalEnvelope, SignalPayload};
pub use table::RoomTable;
pub use types::*;

//! Huddle Server
//!
//! Reference backend for voice rooms: an in-memory room store with atomic
//! room operations and a per-user signaling mailbox, served over HTTP.

pub mod api;
pub mod config;
pub mod rooms;
pub mod signals;

//! Shared record types.

mod room;
mod user;

pub use room::{NewRoom, Participant, PendingInvite, Room, RoomOp, RoomUpdate};
pub use user::UserIdentity;

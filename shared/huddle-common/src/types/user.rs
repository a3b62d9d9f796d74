//! User Types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity record supplied by the host application.
///
/// Huddle never creates or edits these; it only copies the display fields
/// into a room's participant entry on join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// User ID.
    pub id: Uuid,
    /// Display name.
    pub display_name: String,
    /// Avatar image URL.
    pub avatar_url: Option<String>,
}

impl UserIdentity {
    /// Create an identity without an avatar.
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Attach an avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

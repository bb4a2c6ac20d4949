//! Identity provider seam.
//!
//! The tracker only needs a stable user identifier to key the remote route
//! collection; authentication itself lives outside this crate.

/// Source of the currently signed-in user's identifier.
pub trait IdentityProvider: Send + Sync {
    /// The stable identifier of the signed-in user, or `None` when nobody
    /// is signed in. `start` fails soft on `None`.
    fn current_user_id(&self) -> Option<String>;
}

/// Identity provider for embeddings where the user id is already known
/// (tests, demos, single-user daemons).
pub struct FixedIdentity {
    user_id: String,
}

impl FixedIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl IdentityProvider for FixedIdentity {
    fn current_user_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }
}

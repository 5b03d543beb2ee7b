//! Identity/session seam.
//!
//! The identity provider is an external collaborator; the engine only
//! needs the current user, and only for mutating operations.

use chat_types::UserId;
use std::sync::Mutex;

/// Provides the currently authenticated user, if any.
pub trait SessionProvider: Send + Sync {
    /// The signed-in user id, or `None` when signed out.
    fn current_user_id(&self) -> Option<UserId>;
}

/// Fixed session for tests and single-user tooling.
#[derive(Debug, Default)]
pub struct StaticSession {
    user: Mutex<Option<UserId>>,
}

impl StaticSession {
    /// Create a signed-in session for the given user.
    pub fn signed_in(user_id: impl Into<UserId>) -> Self {
        Self {
            user: Mutex::new(Some(user_id.into())),
        }
    }

    /// Create a signed-out session.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Change the signed-in user.
    pub fn set(&self, user_id: Option<UserId>) {
        *self.user.lock().unwrap() = user_id;
    }
}

impl SessionProvider for StaticSession {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_in_returns_user() {
        let session = StaticSession::signed_in("owner1");
        assert_eq!(session.current_user_id(), Some(UserId::new("owner1")));
    }

    #[test]
    fn signed_out_returns_none() {
        let session = StaticSession::signed_out();
        assert!(session.current_user_id().is_none());
    }

    #[test]
    fn set_switches_user() {
        let session = StaticSession::signed_in("owner1");
        session.set(Some(UserId::new("vet1")));
        assert_eq!(session.current_user_id(), Some(UserId::new("vet1")));
        session.set(None);
        assert!(session.current_user_id().is_none());
    }
}

use parking_lot::RwLock;

use crate::model::UserId;

/// Supplies the signed-in user, if any. Read on every registration and
/// request, so sign-in changes take effect on the next call.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
}

/// Mutable holder for the current user, shared by everything that needs it.
#[derive(Default)]
pub struct SignedInUser {
    user: RwLock<Option<UserId>>,
}

impl SignedInUser {
    pub fn new(user: Option<UserId>) -> Self {
        Self {
            user: RwLock::new(user),
        }
    }

    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self::new(Some(user.into()))
    }

    pub fn sign_in(&self, user: impl Into<UserId>) {
        *self.user.write() = Some(user.into());
    }

    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

impl IdentityProvider for SignedInUser {
    fn current_user(&self) -> Option<UserId> {
        self.user.read().clone()
    }
}

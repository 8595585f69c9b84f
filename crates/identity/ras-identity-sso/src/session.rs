//! Request-scoped session state the linker reads and writes.

use ras_identity_core::UserId;
use serde::{Deserialize, Serialize};

/// Marker left on the session after a login that had to synthesize an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRegistration {
    pub uid: UserId,
    pub external_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user: Option<UserId>,
    pub registration: Option<PendingRegistration>,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(uid: UserId) -> Self {
        Self {
            user: Some(uid),
            registration: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Clear the registration marker once the interstitial is done.
    pub fn take_registration(&mut self) -> Option<PendingRegistration> {
        self.registration.take()
    }
}

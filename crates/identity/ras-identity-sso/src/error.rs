//! Errors surfaced by the identity linker.

use ras_identity_core::StoreError;
use thiserror::Error;

pub type LinkResult<T> = Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    /// The account is already bound to a different external identity, or the
    /// external identity already belongs to another account.
    #[error("Account is already associated with a different external identity")]
    MultipleAssociation,

    #[error("Registration via {provider} is disabled")]
    RegistrationDisabled { provider: String },

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

//! Single-provider SSO account linking.
//!
//! Maps identities asserted by an external provider onto local user accounts:
//! linking to the signed-in user, logging in known identities, merging by
//! email, and registering new accounts when allowed. Storage, mail and
//! settings are supplied by the host through the traits in
//! `ras-identity-core`.

mod config;
mod error;
mod hooks;
mod linker;
mod logging;
mod session;
mod settings;

pub use config::{LoggingConfig, ProviderDescriptor, SsoConfig};
pub use error::{LinkError, LinkResult};
pub use hooks::{AssociationEntry, Interstitial, MenuItem, StrategyDescriptor};
pub use linker::{AssociationStatus, IdentityLinker, LoginOutcome, Resolution};
pub use logging::init_tracing;
pub use session::{PendingRegistration, SessionContext};
pub use settings::SettingsCache;

// Re-export common types for convenience
pub use ras_identity_core::{
    AssociationStore, EmailVerifier, PluginSettings, ProviderProfile, ProviderTokens,
    SettingsStore, StoreError, UserField, UserId, UserStore,
};

//! Account linking between the provider's identities and local users.
//!
//! The association store is the source of truth for "is this login known".
//! The inverse direction lives on the user record as the `external_id` field;
//! both are written in the same operation but not atomically, so a crash
//! between the two writes can leave them disagreeing.

use crate::config::SsoConfig;
use crate::error::{LinkError, LinkResult};
use crate::session::{PendingRegistration, SessionContext};
use crate::settings::SettingsCache;
use ras_identity_core::{
    AssociationStore, EmailVerifier, ProviderProfile, ProviderTokens, SettingsStore, UserField,
    UserId, UserStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a login was resolved to a local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Bound to the already authenticated session user
    Linked,
    /// The external identity was already associated
    Existing,
    /// Attached to an existing account with the same email
    Merged,
    /// A new local account was created
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginOutcome {
    pub uid: UserId,
    pub resolution: Resolution,
    /// Set when the provider shared no email and one must be collected
    pub pending_registration: Option<PendingRegistration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationStatus {
    pub linked: bool,
    pub external_id: Option<String>,
}

pub struct IdentityLinker {
    pub(crate) config: SsoConfig,
    pub(crate) settings: SettingsCache,
    users: Arc<dyn UserStore>,
    associations: Arc<dyn AssociationStore>,
    verifier: Arc<dyn EmailVerifier>,
}

impl IdentityLinker {
    pub fn new(
        config: SsoConfig,
        users: Arc<dyn UserStore>,
        associations: Arc<dyn AssociationStore>,
        settings: Arc<dyn SettingsStore>,
        verifier: Arc<dyn EmailVerifier>,
    ) -> Self {
        Self {
            config,
            settings: SettingsCache::new(settings),
            users,
            associations,
            verifier,
        }
    }

    pub fn config(&self) -> &SsoConfig {
        &self.config
    }

    pub fn settings(&self) -> &SettingsCache {
        &self.settings
    }

    /// Resolve a provider callback to a local user id.
    ///
    /// With a `session_user` the identity is linked to that account; without
    /// one the identity is looked up, merged by email, or registered.
    pub async fn resolve_login(
        &self,
        profile: &ProviderProfile,
        tokens: &ProviderTokens,
        session_user: Option<UserId>,
    ) -> LinkResult<LoginOutcome> {
        match session_user {
            Some(uid) => {
                self.link_session_user(uid, profile).await?;
                Ok(LoginOutcome {
                    uid,
                    resolution: Resolution::Linked,
                    pending_registration: None,
                })
            }
            None => self.login_or_register(profile, tokens).await,
        }
    }

    /// Callback entry point: resolve the login and record the result on the
    /// session.
    pub async fn login(
        &self,
        session: &mut SessionContext,
        profile: &ProviderProfile,
        tokens: &ProviderTokens,
    ) -> LinkResult<LoginOutcome> {
        let outcome = self.resolve_login(profile, tokens, session.user).await?;

        if let Some(pending) = &outcome.pending_registration {
            session.registration = Some(pending.clone());
        }
        session.user = Some(outcome.uid);

        Ok(outcome)
    }

    async fn link_session_user(&self, uid: UserId, profile: &ProviderProfile) -> LinkResult<()> {
        let external_id = profile.external_id.as_str();

        let stored = self.users.get_field(uid, UserField::ExternalId).await?;
        if let Some(stored) = stored.as_deref().filter(|s| !s.is_empty()) {
            if stored != external_id {
                warn!(
                    uid = %uid,
                    provider = %self.config.provider.slug,
                    "Refusing to replace existing external identity"
                );
                return Err(LinkError::MultipleAssociation);
            }
        }

        if let Some(owner) = self.associations.uid_for(external_id).await? {
            if owner != uid {
                warn!(
                    uid = %uid,
                    owner = %owner,
                    provider = %self.config.provider.slug,
                    "External identity already belongs to another account"
                );
                return Err(LinkError::MultipleAssociation);
            }
        }

        self.bind(uid, external_id).await?;
        info!(uid = %uid, provider = %self.config.provider.slug, "Linked external identity");
        Ok(())
    }

    async fn login_or_register(
        &self,
        profile: &ProviderProfile,
        tokens: &ProviderTokens,
    ) -> LinkResult<LoginOutcome> {
        let (email, synthesized) = self.derive_email(profile);
        let pending = |uid: UserId| {
            synthesized.then(|| PendingRegistration {
                uid,
                external_id: profile.external_id.clone(),
            })
        };

        if let Some(uid) = self.associations.uid_for(&profile.external_id).await? {
            debug!(uid = %uid, "External identity already associated");
            self.store_tokens(uid, tokens).await?;
            return Ok(LoginOutcome {
                uid,
                resolution: Resolution::Existing,
                pending_registration: pending(uid),
            });
        }

        let settings = self.settings.get().await?;

        let (uid, resolution) = match self.users.uid_by_email(&email).await? {
            Some(uid) => {
                info!(uid = %uid, "Merging external identity into account with matching email");
                self.release_previous_identity(uid, &profile.external_id)
                    .await?;
                (uid, Resolution::Merged)
            }
            None => {
                if settings.disable_registration {
                    info!(
                        provider = %self.config.provider.slug,
                        "Registration disabled, rejecting unknown identity"
                    );
                    return Err(LinkError::RegistrationDisabled {
                        provider: self.config.provider.name.clone(),
                    });
                }

                let uid = self
                    .users
                    .create_user(&profile.display_name, &email)
                    .await?;
                info!(uid = %uid, synthesized_email = synthesized, "Created account for external identity");
                (uid, Resolution::Created)
            }
        };

        self.bind(uid, &profile.external_id).await?;

        self.users
            .set_email_confirmed(uid, settings.auto_confirm)
            .await?;
        if settings.auto_confirm {
            self.users.remove_pending_validation(uid).await?;
        }

        if let Some(picture) = profile
            .picture_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
        {
            self.users
                .set_field(uid, UserField::UploadedPicture, picture)
                .await?;
            self.users.set_field(uid, UserField::Picture, picture).await?;
        }

        self.store_tokens(uid, tokens).await?;

        Ok(LoginOutcome {
            uid,
            resolution,
            pending_registration: pending(uid),
        })
    }

    /// The provider's email, or a placeholder under the provider domain.
    /// The flag is true when the address was synthesized.
    fn derive_email(&self, profile: &ProviderProfile) -> (String, bool) {
        match profile.real_email() {
            Some(email) => (email.to_string(), false),
            None => {
                let local_part = profile
                    .username
                    .as_deref()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or(&profile.external_id);
                (self.config.provider.placeholder_email(local_part), true)
            }
        }
    }

    /// Drop the association of an identity the account is about to replace,
    /// so the account never stays reachable through two external ids.
    async fn release_previous_identity(&self, uid: UserId, external_id: &str) -> LinkResult<()> {
        let previous = self.users.get_field(uid, UserField::ExternalId).await?;
        let Some(previous) = previous
            .as_deref()
            .filter(|id| !id.is_empty() && *id != external_id)
        else {
            return Ok(());
        };

        if self.associations.uid_for(previous).await? == Some(uid) {
            info!(uid = %uid, "Replacing previously linked external identity");
            self.associations.dissociate(previous).await?;
        }
        Ok(())
    }

    async fn bind(&self, uid: UserId, external_id: &str) -> LinkResult<()> {
        self.users
            .set_field(uid, UserField::ExternalId, external_id)
            .await?;
        self.associations.associate(external_id, uid).await?;
        Ok(())
    }

    async fn store_tokens(&self, uid: UserId, tokens: &ProviderTokens) -> LinkResult<()> {
        debug!(uid = %uid, has_refresh = tokens.refresh_token.is_some(), "Storing provider tokens");
        self.users
            .set_field(uid, UserField::AccessToken, &tokens.access_token)
            .await?;
        match &tokens.refresh_token {
            Some(refresh) => {
                self.users
                    .set_field(uid, UserField::RefreshToken, refresh)
                    .await?
            }
            None => self.users.delete_field(uid, UserField::RefreshToken).await?,
        }
        Ok(())
    }

    /// True while the account still carries a synthesized placeholder email.
    pub async fn needs_email_collection(&self, uid: UserId) -> LinkResult<bool> {
        let email = self.users.get_field(uid, UserField::Email).await?;
        Ok(email.is_some_and(|email| self.config.provider.is_placeholder_email(&email)))
    }

    /// Replace the placeholder email with one supplied by the user.
    ///
    /// Runs throttle reset, old-email index removal, email update and
    /// validation send in that order; the first failure aborts the rest.
    /// When the validation mail cannot be sent the previous email is put
    /// back, so the account still needs email collection.
    pub async fn complete_email_collection(&self, uid: UserId, new_email: &str) -> LinkResult<()> {
        let new_email = new_email.trim();
        validate_email(new_email)?;

        self.verifier.reset_confirm_throttle(uid).await?;

        let old_email = self.users.get_field(uid, UserField::Email).await?;
        if let Some(old_email) = &old_email {
            self.users.remove_email_index(old_email).await?;
        }

        self.users.set_field(uid, UserField::Email, new_email).await?;

        if let Err(e) = self.verifier.send_validation_email(uid, new_email).await {
            warn!(uid = %uid, error = %e, "Validation email failed, restoring previous email");
            if let Err(restore) = self.restore_email(uid, old_email.as_deref()).await {
                error!(uid = %uid, error = %restore, "Could not restore previous email");
            }
            return Err(e.into());
        }

        info!(uid = %uid, "Collected email for externally registered account");
        Ok(())
    }

    async fn restore_email(&self, uid: UserId, old_email: Option<&str>) -> LinkResult<()> {
        match old_email {
            Some(old_email) => {
                self.users.set_field(uid, UserField::Email, old_email).await?;
                self.users.index_email(old_email, uid).await?;
            }
            None => self.users.delete_field(uid, UserField::Email).await?,
        }
        Ok(())
    }

    pub async fn get_association(&self, uid: UserId) -> LinkResult<AssociationStatus> {
        let external_id = self
            .users
            .get_field(uid, UserField::ExternalId)
            .await?
            .filter(|id| !id.is_empty());

        Ok(AssociationStatus {
            linked: external_id.is_some(),
            external_id,
        })
    }

    /// Remove the account's external identity in both directions.
    pub async fn unlink(&self, uid: UserId) -> LinkResult<UserId> {
        self.remove_association(uid).await.inspect_err(|e| {
            error!(
                uid = %uid,
                provider = %self.config.provider.slug,
                error = %e,
                "Could not remove external identity data"
            );
        })
    }

    async fn remove_association(&self, uid: UserId) -> LinkResult<UserId> {
        let external_id = self.users.get_field(uid, UserField::ExternalId).await?;

        match external_id.as_deref().filter(|id| !id.is_empty()) {
            Some(external_id) => self.associations.dissociate(external_id).await?,
            None => debug!(uid = %uid, "No external identity stored, clearing field only"),
        }

        self.users.delete_field(uid, UserField::ExternalId).await?;
        info!(uid = %uid, provider = %self.config.provider.slug, "Unlinked external identity");
        Ok(uid)
    }
}

fn validate_email(email: &str) -> LinkResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(LinkError::InvalidEmail(email.to_string()))
    }
}

//! Read-only data the linker contributes to host-assembled views.

use crate::error::LinkResult;
use crate::linker::IdentityLinker;
use crate::session::SessionContext;
use ras_identity_core::{UserField, UserId};
use serde::{Deserialize, Serialize};

/// Login strategy offered on the host's sign-in page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDescriptor {
    pub name: String,
    pub url: String,
    #[serde(rename = "callbackURL")]
    pub callback_url: String,
    /// Absolute callback the provider redirects back to
    pub redirect_uri: String,
    pub icon: String,
    pub scope: String,
}

/// Entry in a user's "linked accounts" list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationEntry {
    pub associated: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deauth_url: Option<String>,
    pub name: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub route: String,
    pub icon: String,
    pub name: String,
}

/// Post-login step asking the user for a real email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interstitial {
    pub template: String,
    pub uid: UserId,
}

impl IdentityLinker {
    /// `None` until both app id and secret are configured.
    pub async fn strategy(&self) -> LinkResult<Option<StrategyDescriptor>> {
        let settings = self.settings.get().await?;
        if !settings.is_configured() {
            return Ok(None);
        }

        let provider = &self.config.provider;
        Ok(Some(StrategyDescriptor {
            name: provider.slug.clone(),
            url: provider.login_path(),
            callback_url: provider.callback_path(),
            redirect_uri: self.config.absolute_url(&provider.callback_path()),
            icon: provider.icon.clone(),
            scope: provider.scopes.join(", "),
        }))
    }

    pub async fn association_entry(&self, uid: UserId) -> LinkResult<AssociationEntry> {
        let status = self.get_association(uid).await?;
        let provider = &self.config.provider;

        let entry = match status.external_id {
            Some(external_id) => AssociationEntry {
                associated: true,
                url: provider.profile_link(&external_id),
                deauth_url: Some(self.config.absolute_url(&provider.deauth_path())),
                name: provider.name.clone(),
                icon: provider.icon.clone(),
            },
            None => AssociationEntry {
                associated: false,
                url: self.config.absolute_url(&provider.login_path()),
                deauth_url: None,
                name: provider.name.clone(),
                icon: provider.icon.clone(),
            },
        };

        Ok(entry)
    }

    pub fn admin_menu_item(&self) -> MenuItem {
        let provider = &self.config.provider;
        MenuItem {
            route: provider.admin_route(),
            icon: provider.icon.clone(),
            name: provider.name.clone(),
        }
    }

    /// User fields the host may expose alongside its own.
    pub fn user_field_whitelist(&self) -> Vec<&'static str> {
        vec![UserField::ExternalId.as_str()]
    }

    /// Email collection step, only for sessions that registered through a
    /// placeholder address still in place.
    pub async fn prepare_interstitial(
        &self,
        session: &SessionContext,
    ) -> LinkResult<Option<Interstitial>> {
        let Some(registration) = &session.registration else {
            return Ok(None);
        };

        if !self.needs_email_collection(registration.uid).await? {
            return Ok(None);
        }

        Ok(Some(Interstitial {
            template: format!("partials/sso-{}/email.tpl", self.config.provider.slug),
            uid: registration.uid,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SsoConfig;
    use ras_identity_core::{PluginSettings, ProviderProfile, ProviderTokens, UserStore};
    use ras_identity_local::{
        InMemoryAssociationStore, InMemoryEmailVerifier, InMemorySettingsStore, InMemoryUserStore,
    };
    use std::sync::Arc;

    fn setup(settings: PluginSettings) -> (IdentityLinker, InMemoryUserStore) {
        let users = InMemoryUserStore::new();
        let config = SsoConfig {
            base_url: "https://forum.example.org".to_string(),
            ..Default::default()
        };
        let linker = IdentityLinker::new(
            config,
            Arc::new(users.clone()),
            Arc::new(InMemoryAssociationStore::new()),
            Arc::new(InMemorySettingsStore::new(settings)),
            Arc::new(InMemoryEmailVerifier::new()),
        );
        (linker, users)
    }

    fn configured() -> PluginSettings {
        PluginSettings {
            app_id: "bot-token".to_string(),
            secret: "secret".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_strategy_requires_credentials() {
        let (linker, _) = setup(PluginSettings::default());
        assert_eq!(linker.strategy().await.unwrap(), None);

        let (linker, _) = setup(configured());
        let strategy = linker.strategy().await.unwrap().unwrap();
        assert_eq!(strategy.name, "telegram");
        assert_eq!(strategy.url, "/auth/telegram");
        assert_eq!(strategy.callback_url, "/auth/telegram/callback");
        assert_eq!(
            strategy.redirect_uri,
            "https://forum.example.org/auth/telegram/callback"
        );
        assert_eq!(strategy.scope, "public_profile, email");

        let json = serde_json::to_value(&strategy).unwrap();
        assert_eq!(json["callbackURL"], "/auth/telegram/callback");
    }

    #[tokio::test]
    async fn test_association_entry_reflects_link_state() {
        let (linker, users) = setup(configured());
        let uid = users.create_user("Ada", "ada@example.com").await.unwrap();

        let entry = linker.association_entry(uid).await.unwrap();
        assert!(!entry.associated);
        assert_eq!(entry.url, "https://forum.example.org/auth/telegram");
        assert_eq!(entry.deauth_url, None);

        linker
            .resolve_login(
                &ProviderProfile::new("42", "Ada"),
                &ProviderTokens::default(),
                Some(uid),
            )
            .await
            .unwrap();

        let entry = linker.association_entry(uid).await.unwrap();
        assert!(entry.associated);
        assert_eq!(entry.url, "https://telegram.com/42");
        assert_eq!(
            entry.deauth_url.as_deref(),
            Some("https://forum.example.org/deauth/telegram")
        );

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["deauthUrl"], "https://forum.example.org/deauth/telegram");
    }

    #[test]
    fn test_menu_item_and_whitelist() {
        let (linker, _) = setup(configured());

        let item = linker.admin_menu_item();
        assert_eq!(item.route, "/plugins/sso-telegram");
        assert_eq!(item.icon, "fa-telegram");
        assert_eq!(item.name, "Telegram");

        assert_eq!(linker.user_field_whitelist(), vec!["external_id"]);
    }

    #[tokio::test]
    async fn test_interstitial_only_for_placeholder_registrations() {
        let (linker, _) = setup(configured());

        let anonymous = SessionContext::anonymous();
        assert_eq!(linker.prepare_interstitial(&anonymous).await.unwrap(), None);

        let mut session = SessionContext::anonymous();
        let outcome = linker
            .login(
                &mut session,
                &ProviderProfile::new("42", "Ada"),
                &ProviderTokens::default(),
            )
            .await
            .unwrap();

        let interstitial = linker.prepare_interstitial(&session).await.unwrap().unwrap();
        assert_eq!(interstitial.uid, outcome.uid);
        assert_eq!(interstitial.template, "partials/sso-telegram/email.tpl");

        linker
            .complete_email_collection(outcome.uid, "ada@example.com")
            .await
            .unwrap();
        assert_eq!(linker.prepare_interstitial(&session).await.unwrap(), None);
    }
}

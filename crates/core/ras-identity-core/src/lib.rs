//! Core types and collaborator traits for linking external provider identities
//! to local user accounts.
//!
//! The host platform owns persistence; this crate only describes what the
//! linking logic needs from it. Every collaborator is an async trait so hosts
//! can back it with whatever storage they already run.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Email already in use: {0}")]
    EmailTaken(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Local user id assigned by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Profile handed over by the provider after a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub external_id: String,
    pub display_name: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub picture_url: Option<String>,
}

impl ProviderProfile {
    pub fn new(external_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: display_name.into(),
            username: None,
            email: None,
            picture_url: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_picture(mut self, picture_url: impl Into<String>) -> Self {
        self.picture_url = Some(picture_url.into());
        self
    }

    /// The provider-supplied email, ignoring blank values.
    pub fn real_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

/// Tokens returned by the provider exchange.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl ProviderTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

impl fmt::Debug for ProviderTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// String fields on a user record that the linker reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserField {
    Email,
    ExternalId,
    Picture,
    UploadedPicture,
    AccessToken,
    RefreshToken,
}

impl UserField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserField::Email => "email",
            UserField::ExternalId => "external_id",
            UserField::Picture => "picture",
            UserField::UploadedPicture => "uploaded_picture",
            UserField::AccessToken => "access_token",
            UserField::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for UserField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plugin configuration as stored by the host's admin settings page.
///
/// The host stores checkboxes as `"on"`/`"off"` strings, so both flags accept
/// those alongside plain booleans.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub app_id: String,
    pub secret: String,
    #[serde(alias = "autoconfirm", deserialize_with = "deserialize_flag")]
    pub auto_confirm: bool,
    #[serde(alias = "disableRegistration", deserialize_with = "deserialize_flag")]
    pub disable_registration: bool,
}

impl PluginSettings {
    /// Both credentials are present, so the login strategy can be offered.
    pub fn is_configured(&self) -> bool {
        !self.app_id.trim().is_empty() && !self.secret.trim().is_empty()
    }
}

impl fmt::Debug for PluginSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSettings")
            .field("app_id", &self.app_id)
            .field("secret", &"<redacted>")
            .field("auto_confirm", &self.auto_confirm)
            .field("disable_registration", &self.disable_registration)
            .finish()
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(i64),
        Text(String),
        Missing(()),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Number(value) => value != 0,
        Flag::Text(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "on" | "true" | "1" | "yes"
        ),
        Flag::Missing(()) => false,
    })
}

/// Access to the host's user records and the indexes kept alongside them.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_field(&self, uid: UserId, field: UserField) -> StoreResult<Option<String>>;

    async fn set_field(&self, uid: UserId, field: UserField, value: &str) -> StoreResult<()>;

    async fn delete_field(&self, uid: UserId, field: UserField) -> StoreResult<()>;

    async fn set_email_confirmed(&self, uid: UserId, confirmed: bool) -> StoreResult<()>;

    /// Create a user and index its email. Returns the new id.
    async fn create_user(&self, username: &str, email: &str) -> StoreResult<UserId>;

    async fn uid_by_email(&self, email: &str) -> StoreResult<Option<UserId>>;

    /// Drop an address from the email to uid index.
    async fn remove_email_index(&self, email: &str) -> StoreResult<()>;

    /// Point an address at a user in the email to uid index.
    async fn index_email(&self, email: &str, uid: UserId) -> StoreResult<()>;

    /// Drop a user from the "pending validation" index.
    async fn remove_pending_validation(&self, uid: UserId) -> StoreResult<()>;
}

/// Mapping from external identity to local user id.
#[async_trait]
pub trait AssociationStore: Send + Sync {
    async fn uid_for(&self, external_id: &str) -> StoreResult<Option<UserId>>;

    async fn associate(&self, external_id: &str, uid: UserId) -> StoreResult<()>;

    async fn dissociate(&self, external_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn fetch(&self) -> StoreResult<PluginSettings>;
}

/// Email confirmation machinery owned by the host.
#[async_trait]
pub trait EmailVerifier: Send + Sync {
    /// Clear the "confirmation email recently sent" throttle for a user.
    async fn reset_confirm_throttle(&self, uid: UserId) -> StoreResult<()>;

    async fn send_validation_email(&self, uid: UserId, email: &str) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_accept_host_checkbox_values() {
        let json = serde_json::json!({
            "app_id": "bot-token",
            "secret": "shh",
            "autoconfirm": "on",
            "disableRegistration": "off"
        });

        let settings: PluginSettings = serde_json::from_value(json).unwrap();
        assert_eq!(settings.app_id, "bot-token");
        assert!(settings.auto_confirm);
        assert!(!settings.disable_registration);
        assert!(settings.is_configured());
    }

    #[test]
    fn test_settings_accept_booleans_and_missing_fields() {
        let json = serde_json::json!({
            "auto_confirm": false,
            "disable_registration": true
        });

        let settings: PluginSettings = serde_json::from_value(json).unwrap();
        assert!(!settings.auto_confirm);
        assert!(settings.disable_registration);
        assert!(!settings.is_configured());

        let empty: PluginSettings = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty, PluginSettings::default());
    }

    #[test]
    fn test_settings_null_flag_is_off() {
        let json = serde_json::json!({ "autoconfirm": null, "disableRegistration": 1 });

        let settings: PluginSettings = serde_json::from_value(json).unwrap();
        assert!(!settings.auto_confirm);
        assert!(settings.disable_registration);
    }

    #[test]
    fn test_blank_credentials_are_not_configured() {
        let settings = PluginSettings {
            app_id: "  ".to_string(),
            secret: "secret".to_string(),
            ..Default::default()
        };
        assert!(!settings.is_configured());
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let settings = PluginSettings {
            app_id: "app".to_string(),
            secret: "super-secret".to_string(),
            ..Default::default()
        };
        let tokens = ProviderTokens::new("access-123", Some("refresh-456".to_string()));

        let rendered = format!("{settings:?} {tokens:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("access-123"));
        assert!(!rendered.contains("refresh-456"));
        assert!(rendered.contains("app"));
    }

    #[test]
    fn test_real_email_ignores_blank_values() {
        let profile = ProviderProfile::new("42", "Ada").with_email("   ");
        assert_eq!(profile.real_email(), None);

        let profile = ProviderProfile::new("42", "Ada").with_email(" ada@example.com ");
        assert_eq!(profile.real_email(), Some("ada@example.com"));
    }

    #[test]
    fn test_user_id_serializes_transparently() {
        let uid = UserId(7);
        assert_eq!(serde_json::to_value(uid).unwrap(), serde_json::json!(7));
        assert_eq!(uid.to_string(), "7");
    }
}

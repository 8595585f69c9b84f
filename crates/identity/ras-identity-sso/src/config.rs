//! Configuration for the SSO linker.
//!
//! Values come from, in increasing precedence:
//! - built-in defaults
//! - an optional TOML file (`SSO_CONFIG_FILE`, default `sso.toml`)
//! - environment variables prefixed with `SSO__`, using `__` for nesting,
//!   e.g. `SSO__PROVIDER__EMAIL_DOMAIN`

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "json", "compact"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsoConfig {
    /// Absolute forum URL without a trailing slash
    pub base_url: String,

    /// Path prefix the forum is mounted under, empty when served from the root
    pub relative_path: String,

    pub provider: ProviderDescriptor,

    pub logging: LoggingConfig,
}

/// The one identity provider this linker talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderDescriptor {
    /// Human readable name, e.g. "Telegram"
    pub name: String,

    /// URL-safe identifier used in routes, e.g. "telegram"
    pub slug: String,

    /// Font Awesome icon class shown next to the provider
    pub icon: String,

    /// Domain used for synthesized placeholder emails
    pub email_domain: String,

    /// Public profile URL prefix; the external id is appended
    pub profile_url: String,

    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json, compact)
    pub format: String,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4567".to_string(),
            relative_path: String::new(),
            provider: ProviderDescriptor::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ProviderDescriptor {
    fn default() -> Self {
        Self {
            name: "Telegram".to_string(),
            slug: "telegram".to_string(),
            icon: "fa-telegram".to_string(),
            email_domain: "telegram.com".to_string(),
            profile_url: "https://telegram.com/".to_string(),
            scopes: vec!["public_profile".to_string(), "email".to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ProviderDescriptor {
    /// Address synthesized for users whose provider shares no email.
    pub fn placeholder_email(&self, local_part: &str) -> String {
        format!("{}@{}", local_part, self.email_domain)
    }

    pub fn is_placeholder_email(&self, email: &str) -> bool {
        let suffix = format!("@{}", self.email_domain.to_ascii_lowercase());
        email.trim().to_ascii_lowercase().ends_with(&suffix)
    }

    pub fn login_path(&self) -> String {
        format!("/auth/{}", self.slug)
    }

    pub fn callback_path(&self) -> String {
        format!("/auth/{}/callback", self.slug)
    }

    pub fn deauth_path(&self) -> String {
        format!("/deauth/{}", self.slug)
    }

    /// Route of the admin menu entry, relative to the admin area.
    pub fn admin_route(&self) -> String {
        format!("/plugins/sso-{}", self.slug)
    }

    pub fn admin_page_path(&self) -> String {
        format!("/admin{}", self.admin_route())
    }

    pub fn profile_link(&self, external_id: &str) -> String {
        format!("{}{}", self.profile_url, external_id)
    }
}

impl SsoConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("SSO_CONFIG_FILE").unwrap_or_else(|_| "sso.toml".to_string());
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &str) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // Accept both "sso.toml" and "sso"
        let with_extension = format!("{config_path}.toml");
        if Path::new(config_path).exists() || Path::new(&with_extension).exists() {
            info!("Loading SSO configuration from {}", config_path);
            builder = builder.add_source(File::with_name(config_path).format(FileFormat::Toml));
        } else {
            debug!("No config file found at {}, using defaults", config_path);
        }

        builder = builder.add_source(
            Environment::with_prefix("SSO")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let settings: SsoConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("base_url cannot be empty");
        }
        if self.base_url.ends_with('/') {
            anyhow::bail!("base_url must not end with '/'");
        }
        if !self.relative_path.is_empty()
            && (!self.relative_path.starts_with('/') || self.relative_path.ends_with('/'))
        {
            anyhow::bail!(
                "relative_path '{}' must start with '/' and not end with '/'",
                self.relative_path
            );
        }

        let slug = &self.provider.slug;
        if slug.is_empty()
            || !slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            anyhow::bail!(
                "Provider slug '{}' must be non-empty and contain only [a-z0-9_-]",
                slug
            );
        }
        if self.provider.name.trim().is_empty() {
            anyhow::bail!("Provider name cannot be empty");
        }
        if self.provider.email_domain.trim().is_empty() || self.provider.email_domain.contains('@')
        {
            anyhow::bail!(
                "Invalid placeholder email domain '{}'",
                self.provider.email_domain
            );
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.logging.level,
                VALID_LOG_LEVELS
            );
        }

        let format = self.logging.format.to_lowercase();
        if !VALID_LOG_FORMATS.contains(&format.as_str()) {
            anyhow::bail!(
                "Invalid log format '{}'. Must be one of: {:?}",
                self.logging.format,
                VALID_LOG_FORMATS
            );
        }

        Ok(())
    }

    /// Absolute URL for a forum-relative path.
    pub fn absolute_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Where the browser lands after unlinking.
    pub fn unlink_redirect(&self) -> String {
        format!("{}/me/edit", self.relative_path)
    }
}

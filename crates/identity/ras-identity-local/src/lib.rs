//! In-memory implementations of the identity-linking collaborators.
//!
//! These back the linker in tests and in small deployments that do not need a
//! persistent host. Every store is cheap to clone and shares its state across
//! clones.

use async_trait::async_trait;
use ras_identity_core::{
    AssociationStore, EmailVerifier, PluginSettings, SettingsStore, StoreError, StoreResult,
    UserField, UserId, UserStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub uid: UserId,
    pub username: String,
    pub email_confirmed: bool,
    pub fields: HashMap<UserField, String>,
}

impl LocalUser {
    pub fn field(&self, field: UserField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

#[derive(Default)]
struct UserTables {
    users: HashMap<UserId, LocalUser>,
    email_index: HashMap<String, UserId>,
    pending_validation: HashSet<UserId>,
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone)]
pub struct InMemoryUserStore {
    tables: Arc<RwLock<UserTables>>,
    next_uid: Arc<AtomicU64>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(UserTables::default())),
            next_uid: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn user(&self, uid: UserId) -> Option<LocalUser> {
        self.tables.read().await.users.get(&uid).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }

    pub async fn is_pending_validation(&self, uid: UserId) -> bool {
        self.tables.read().await.pending_validation.contains(&uid)
    }

    pub async fn is_email_indexed(&self, email: &str) -> bool {
        self.tables
            .read()
            .await
            .email_index
            .contains_key(&email_key(email))
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_field(&self, uid: UserId, field: UserField) -> StoreResult<Option<String>> {
        let tables = self.tables.read().await;
        let user = tables.users.get(&uid).ok_or(StoreError::UserNotFound(uid))?;
        Ok(user.fields.get(&field).cloned())
    }

    async fn set_field(&self, uid: UserId, field: UserField, value: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&uid)
            .ok_or(StoreError::UserNotFound(uid))?;
        user.fields.insert(field, value.to_string());
        Ok(())
    }

    async fn delete_field(&self, uid: UserId, field: UserField) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&uid)
            .ok_or(StoreError::UserNotFound(uid))?;
        user.fields.remove(&field);
        Ok(())
    }

    async fn set_email_confirmed(&self, uid: UserId, confirmed: bool) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&uid)
            .ok_or(StoreError::UserNotFound(uid))?;
        user.email_confirmed = confirmed;
        Ok(())
    }

    async fn create_user(&self, username: &str, email: &str) -> StoreResult<UserId> {
        let mut tables = self.tables.write().await;
        let key = email_key(email);
        if tables.email_index.contains_key(&key) {
            return Err(StoreError::EmailTaken(email.to_string()));
        }

        let uid = UserId(self.next_uid.fetch_add(1, Ordering::SeqCst));
        let mut fields = HashMap::new();
        fields.insert(UserField::Email, email.to_string());

        tables.users.insert(
            uid,
            LocalUser {
                uid,
                username: username.to_string(),
                email_confirmed: false,
                fields,
            },
        );
        tables.email_index.insert(key, uid);
        tables.pending_validation.insert(uid);

        Ok(uid)
    }

    async fn uid_by_email(&self, email: &str) -> StoreResult<Option<UserId>> {
        let tables = self.tables.read().await;
        Ok(tables.email_index.get(&email_key(email)).copied())
    }

    async fn remove_email_index(&self, email: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.email_index.remove(&email_key(email));
        Ok(())
    }

    async fn index_email(&self, email: &str, uid: UserId) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&uid) {
            return Err(StoreError::UserNotFound(uid));
        }
        tables.email_index.insert(email_key(email), uid);
        Ok(())
    }

    async fn remove_pending_validation(&self, uid: UserId) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.pending_validation.remove(&uid);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAssociationStore {
    links: Arc<RwLock<HashMap<String, UserId>>>,
}

impl InMemoryAssociationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> HashMap<String, UserId> {
        self.links.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.links.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.links.read().await.is_empty()
    }
}

#[async_trait]
impl AssociationStore for InMemoryAssociationStore {
    async fn uid_for(&self, external_id: &str) -> StoreResult<Option<UserId>> {
        Ok(self.links.read().await.get(external_id).copied())
    }

    async fn associate(&self, external_id: &str, uid: UserId) -> StoreResult<()> {
        self.links
            .write()
            .await
            .insert(external_id.to_string(), uid);
        Ok(())
    }

    async fn dissociate(&self, external_id: &str) -> StoreResult<()> {
        self.links.write().await.remove(external_id);
        Ok(())
    }
}

/// Settings held in memory. Counts fetches so callers can observe caching.
#[derive(Clone, Default)]
pub struct InMemorySettingsStore {
    settings: Arc<RwLock<PluginSettings>>,
    fetches: Arc<AtomicUsize>,
}

impl InMemorySettingsStore {
    pub fn new(settings: PluginSettings) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build from the raw key/value object the host's settings page saves.
    pub fn from_json(value: serde_json::Value) -> StoreResult<Self> {
        Ok(Self::new(serde_json::from_value(value)?))
    }

    pub async fn replace(&self, settings: PluginSettings) {
        *self.settings.write().await = settings;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn fetch(&self) -> StoreResult<PluginSettings> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.settings.read().await.clone())
    }
}

#[derive(Default)]
struct Outbox {
    throttle_resets: Vec<UserId>,
    sent: Vec<(UserId, String)>,
}

/// Records confirmation activity instead of sending mail.
#[derive(Clone, Default)]
pub struct InMemoryEmailVerifier {
    outbox: Arc<RwLock<Outbox>>,
}

impl InMemoryEmailVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(UserId, String)> {
        self.outbox.read().await.sent.clone()
    }

    pub async fn throttle_resets(&self) -> Vec<UserId> {
        self.outbox.read().await.throttle_resets.clone()
    }
}

#[async_trait]
impl EmailVerifier for InMemoryEmailVerifier {
    async fn reset_confirm_throttle(&self, uid: UserId) -> StoreResult<()> {
        self.outbox.write().await.throttle_resets.push(uid);
        Ok(())
    }

    async fn send_validation_email(&self, uid: UserId, email: &str) -> StoreResult<()> {
        self.outbox
            .write()
            .await
            .sent
            .push((uid, email.to_string()));
        Ok(())
    }
}

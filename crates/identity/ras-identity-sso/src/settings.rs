//! Fetch-once cache over the host's plugin settings.

use ras_identity_core::{PluginSettings, SettingsStore, StoreResult};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Settings are fetched on first use and reused until `refresh` or
/// `invalidate` is called. Nothing expires on its own.
pub struct SettingsCache {
    store: Arc<dyn SettingsStore>,
    cached: RwLock<Option<Arc<PluginSettings>>>,
}

impl SettingsCache {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            cached: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> StoreResult<Arc<PluginSettings>> {
        if let Some(settings) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(settings));
        }

        let mut cached = self.cached.write().await;
        // Another caller may have filled it while we waited for the lock
        if let Some(settings) = cached.as_ref() {
            return Ok(Arc::clone(settings));
        }

        let settings = Arc::new(self.store.fetch().await?);
        debug!(
            configured = settings.is_configured(),
            auto_confirm = settings.auto_confirm,
            disable_registration = settings.disable_registration,
            "Loaded plugin settings"
        );
        *cached = Some(Arc::clone(&settings));
        Ok(settings)
    }

    /// Refetch unconditionally. On failure the previous value is kept.
    pub async fn refresh(&self) -> StoreResult<Arc<PluginSettings>> {
        let settings = Arc::new(self.store.fetch().await?);
        *self.cached.write().await = Some(Arc::clone(&settings));
        debug!("Refreshed plugin settings");
        Ok(settings)
    }

    pub async fn invalidate(&self) {
        self.cached.write().await.take();
    }

    pub async fn is_loaded(&self) -> bool {
        self.cached.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ras_identity_core::StoreError;
    use ras_identity_local::InMemorySettingsStore;

    fn settings(app_id: &str) -> PluginSettings {
        PluginSettings {
            app_id: app_id.to_string(),
            secret: "secret".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetches_once() {
        let store = InMemorySettingsStore::new(settings("first"));
        let cache = SettingsCache::new(Arc::new(store.clone()));
        assert!(!cache.is_loaded().await);

        assert_eq!(cache.get().await.unwrap().app_id, "first");
        store.replace(settings("second")).await;

        // Still served from the cache
        assert_eq!(cache.get().await.unwrap().app_id, "first");
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_and_invalidate() {
        let store = InMemorySettingsStore::new(settings("first"));
        let cache = SettingsCache::new(Arc::new(store.clone()));
        cache.get().await.unwrap();

        store.replace(settings("second")).await;
        assert_eq!(cache.refresh().await.unwrap().app_id, "second");
        assert_eq!(cache.get().await.unwrap().app_id, "second");

        store.replace(settings("third")).await;
        cache.invalidate().await;
        assert!(!cache.is_loaded().await);
        assert_eq!(cache.get().await.unwrap().app_id, "third");
        assert_eq!(store.fetch_count(), 3);
    }

    struct BrokenSettings;

    #[async_trait]
    impl SettingsStore for BrokenSettings {
        async fn fetch(&self) -> StoreResult<PluginSettings> {
            Err(StoreError::Backend("settings unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let cache = SettingsCache::new(Arc::new(BrokenSettings));

        assert!(matches!(cache.get().await, Err(StoreError::Backend(_))));
        assert!(!cache.is_loaded().await);
    }
}

//! Time-boxed cache of merged provider configs.
//!
//! Entries live for [`CONFIG_TTL`] and are refreshed lazily by the next caller
//! after expiry. The map lock is never held across a store read, so callers
//! racing on an expired entry may each refresh it; reads are idempotent and
//! the last writer wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::spawn_blocking;

use super::config::{ConfigStore, ProviderConfig, ProviderKind};
use crate::settings::GatewaySettings;

pub const CONFIG_TTL: Duration = Duration::from_secs(60);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Where a provider's API key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    Env,
    Store,
    None,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::Env => "env",
            KeySource::Store => "store",
            KeySource::None => "none",
        }
    }
}

#[derive(Debug)]
pub struct CachedConfig {
    pub config: ProviderConfig,
    pub key_source: KeySource,
}

struct Entry {
    fetched_at: Instant,
    value: Arc<CachedConfig>,
}

pub struct ConfigCache {
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    settings: Arc<GatewaySettings>,
    ttl: Duration,
    entries: Mutex<HashMap<ProviderKind, Entry>>,
}

impl ConfigCache {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        clock: Arc<dyn Clock>,
        settings: Arc<GatewaySettings>,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
            ttl: CONFIG_TTL,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the merged config for `provider`, reading the store only when
    /// the cached entry is missing or older than the TTL.
    pub async fn get_provider_config(&self, provider: ProviderKind) -> Arc<CachedConfig> {
        if let Some(hit) = self.fresh_entry(provider) {
            return hit;
        }

        let stored = self.read_store(provider).await;
        let merged = Arc::new(self.merge(provider, stored));
        let fetched_at = self.clock.now();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                provider,
                Entry {
                    fetched_at,
                    value: Arc::clone(&merged),
                },
            );
        }
        merged
    }

    fn fresh_entry(&self, provider: ProviderKind) -> Option<Arc<CachedConfig>> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(&provider)?;
        let age = self.clock.now().saturating_duration_since(entry.fetched_at);
        (age < self.ttl).then(|| Arc::clone(&entry.value))
    }

    async fn read_store(&self, provider: ProviderKind) -> Option<ProviderConfig> {
        let store = Arc::clone(&self.store);
        match spawn_blocking(move || store.load(provider)).await {
            Ok(Ok(record)) => record,
            Ok(Err(err)) => {
                log::debug!("config store read for {} failed: {err:#}", provider.id());
                None
            }
            Err(err) => {
                log::debug!("config store task for {} failed: {err}", provider.id());
                None
            }
        }
    }

    // The environment key always beats the stored one; structured config only
    // ever comes from the store.
    fn merge(&self, provider: ProviderKind, stored: Option<ProviderConfig>) -> CachedConfig {
        let stored = stored.unwrap_or_default();
        let stored_key = stored.api_key.filter(|k| !k.trim().is_empty());
        let (api_key, key_source) = match (self.settings.api_key(provider), stored_key) {
            (Some(env), _) => (Some(env), KeySource::Env),
            (None, Some(db)) => (Some(db), KeySource::Store),
            (None, None) => (None, KeySource::None),
        };
        CachedConfig {
            config: ProviderConfig {
                api_key,
                extra: stored.extra,
            },
            key_source,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Clock that only moves when told to.
    pub struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    /// In-memory store that counts reads and can be told to fail.
    #[derive(Default)]
    pub struct CountingStore {
        pub records: Mutex<HashMap<ProviderKind, ProviderConfig>>,
        pub reads: AtomicUsize,
        pub fail: bool,
    }

    impl CountingStore {
        pub fn with(provider: ProviderKind, config: ProviderConfig) -> Self {
            let store = Self::default();
            store.records.lock().unwrap().insert(provider, config);
            store
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl ConfigStore for CountingStore {
        fn load(&self, provider: ProviderKind) -> anyhow::Result<Option<ProviderConfig>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("store offline");
            }
            Ok(self.records.lock().unwrap().get(&provider).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{CountingStore, ManualClock};
    use super::*;
    use serde_json::json;

    fn cache_with(
        store: Arc<CountingStore>,
        clock: Arc<ManualClock>,
        settings: GatewaySettings,
    ) -> ConfigCache {
        ConfigCache::new(store, clock, Arc::new(settings))
    }

    #[tokio::test]
    async fn hits_within_ttl_share_the_cached_value() {
        let store = Arc::new(CountingStore::with(
            ProviderKind::OpenRouter,
            ProviderConfig {
                api_key: Some("db-key".into()),
                extra: None,
            },
        ));
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(store.clone(), clock.clone(), GatewaySettings::default());

        let first = cache.get_provider_config(ProviderKind::OpenRouter).await;
        clock.advance(Duration::from_secs(59));
        let second = cache.get_provider_config(ProviderKind::OpenRouter).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test]
    async fn expiry_triggers_exactly_one_fresh_read() {
        let store = Arc::new(CountingStore::default());
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(store.clone(), clock.clone(), GatewaySettings::default());

        let first = cache.get_provider_config(ProviderKind::Claude).await;
        clock.advance(Duration::from_secs(60));
        let second = cache.get_provider_config(ProviderKind::Claude).await;
        let third = cache.get_provider_config(ProviderKind::Claude).await;

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn entries_are_kept_per_provider() {
        let store = Arc::new(CountingStore::default());
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(store.clone(), clock, GatewaySettings::default());

        cache.get_provider_config(ProviderKind::OpenAi).await;
        cache.get_provider_config(ProviderKind::Gemini).await;
        cache.get_provider_config(ProviderKind::OpenAi).await;
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn env_key_wins_but_stored_policy_is_kept() {
        let store = Arc::new(CountingStore::with(
            ProviderKind::OpenRouter,
            ProviderConfig {
                api_key: Some("db-key".into()),
                extra: Some(json!({"model": "pinned"})),
            },
        ));
        let settings = GatewaySettings::default().with_api_key(ProviderKind::OpenRouter, "env-key");
        let cache = cache_with(store, Arc::new(ManualClock::new()), settings);

        let cached = cache.get_provider_config(ProviderKind::OpenRouter).await;
        assert_eq!(cached.config.api_key.as_deref(), Some("env-key"));
        assert_eq!(cached.key_source, KeySource::Env);
        assert_eq!(cached.config.preferred_model().as_deref(), Some("pinned"));
    }

    #[tokio::test]
    async fn store_failures_are_treated_as_no_record() {
        let store = Arc::new(CountingStore::failing());
        let settings = GatewaySettings::default().with_api_key(ProviderKind::Claude, "env-key");
        let cache = cache_with(store.clone(), Arc::new(ManualClock::new()), settings);

        let claude = cache.get_provider_config(ProviderKind::Claude).await;
        assert_eq!(claude.config.api_key.as_deref(), Some("env-key"));

        let openai = cache.get_provider_config(ProviderKind::OpenAi).await;
        assert!(openai.config.api_key.is_none());
        assert_eq!(openai.key_source, KeySource::None);
        assert_eq!(store.reads(), 2);
    }
}

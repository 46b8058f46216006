use std::sync::Arc;

use contextaware_protocol::{EngineKind, PageResult, Preferences, PreferencesPatch, SiteContext};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::{
    CONTEXT_KEY, DEFAULT_MAX_RECENT_PER_SITE, DEFAULT_MAX_RESULTS, SETTINGS_KEY, SUMMARIES_KEY,
};

type Summaries = IndexMap<String, PageResult>;
type Contexts = IndexMap<String, SiteContext>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_results: usize,
    pub max_recent_per_site: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            max_recent_per_site: DEFAULT_MAX_RECENT_PER_SITE,
        }
    }
}

/// Result cache over a [`StorageBackend`].
///
/// Each partition is rewritten as a whole on every mutation, so each one has
/// its own lock held across the read-modify-write. A backend failure turns
/// the operation into a logged no-op.
pub struct ResultStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    limits: StoreLimits,
    summaries: Mutex<()>,
    contexts: Mutex<()>,
    settings: Mutex<()>,
}

impl ResultStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            limits: StoreLimits::default(),
            summaries: Mutex::new(()),
            contexts: Mutex::new(()),
            settings: Mutex::new(()),
        }
    }

    pub fn with_limits(mut self, limits: StoreLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub async fn get_result(&self, page_key: &str) -> Option<PageResult> {
        let summaries: Summaries = self.read_or_default(SUMMARIES_KEY).await;
        summaries.get(page_key).cloned()
    }

    /// Number of page results currently persisted.
    pub async fn result_count(&self) -> usize {
        let summaries: Summaries = self.read_or_default(SUMMARIES_KEY).await;
        summaries.len()
    }

    /// Stores a new result for `page_key`, superseding any previous one, and
    /// evicts the oldest results beyond the cap. The created result is
    /// returned even when persisting it failed.
    pub async fn put_result(
        &self,
        page_key: &str,
        content: impl Into<String>,
        engine_kind: EngineKind,
    ) -> PageResult {
        let result = PageResult {
            key: page_key.to_string(),
            content: content.into(),
            engine_kind,
            produced_at: self.clock.now_millis(),
        };

        let _guard = self.summaries.lock().await;
        let Some(mut summaries) = self.read_for_update::<Summaries>(SUMMARIES_KEY).await else {
            return result;
        };

        summaries.shift_remove(page_key);
        summaries.insert(page_key.to_string(), result.clone());
        let evicted = evict_oldest(&mut summaries, self.limits.max_results);
        if evicted > 0 {
            debug!(target: "result_store", evicted, "evicted oldest page results");
        }

        self.write(SUMMARIES_KEY, &summaries).await;
        result
    }

    /// With a key: zero or one context. Without: every context, most
    /// recently visited first.
    pub async fn get_site_context(&self, site_key: Option<&str>) -> Vec<SiteContext> {
        let contexts: Contexts = self.read_or_default(CONTEXT_KEY).await;
        match site_key {
            Some(key) => contexts.get(key).cloned().into_iter().collect(),
            None => {
                let mut all: Vec<SiteContext> = contexts.into_values().collect();
                all.sort_by(|a, b| b.last_visit_at.cmp(&a.last_visit_at));
                all
            }
        }
    }

    pub async fn record_visit(&self, site_key: &str, result: Option<PageResult>) {
        let now = self.clock.now_millis();
        let _guard = self.contexts.lock().await;
        let Some(mut contexts) = self.read_for_update::<Contexts>(CONTEXT_KEY).await else {
            return;
        };

        let context = contexts
            .entry(site_key.to_string())
            .or_insert_with(|| SiteContext::new(site_key, now));
        context.visit_count = context.visit_count.saturating_add(1);
        context.last_visit_at = now;
        if let Some(result) = result {
            context.recent_results.push(result);
            let overflow = context
                .recent_results
                .len()
                .saturating_sub(self.limits.max_recent_per_site);
            context.recent_results.drain(..overflow);
        }

        self.write(CONTEXT_KEY, &contexts).await;
    }

    /// Erases both partitions and the preferences. Only ever called on an
    /// explicit user reset.
    pub async fn clear_all(&self) {
        let _summaries = self.summaries.lock().await;
        let _contexts = self.contexts.lock().await;
        let _settings = self.settings.lock().await;
        if let Err(err) = self
            .backend
            .remove(&[SUMMARIES_KEY, CONTEXT_KEY, SETTINGS_KEY])
            .await
        {
            warn!(target: "result_store", error = %err, "failed to clear stored data");
        }
    }

    /// Stored preferences, or the defaults when none are stored yet.
    pub async fn get_preferences(&self) -> Preferences {
        self.read_or_default(SETTINGS_KEY).await
    }

    /// Writes default preferences when none exist. Returns whether it wrote.
    pub async fn ensure_preferences(&self) -> bool {
        let _guard = self.settings.lock().await;
        match self.read::<Preferences>(SETTINGS_KEY).await {
            Ok(Some(_)) => false,
            Ok(None) => self.write(SETTINGS_KEY, &Preferences::default()).await,
            Err(err) => {
                warn!(target: "result_store", error = %err, "could not check stored preferences");
                false
            }
        }
    }

    /// Applies a field-level patch under the settings lock. Concurrent
    /// writers touching different fields both land; the same field is last
    /// write wins.
    pub async fn update_preferences(&self, patch: &PreferencesPatch) -> Preferences {
        let _guard = self.settings.lock().await;
        let mut preferences = match self.read::<Preferences>(SETTINGS_KEY).await {
            Ok(stored) => stored.unwrap_or_default(),
            Err(err) => {
                warn!(target: "result_store", error = %err, "could not read preferences for update");
                return Preferences::default();
            }
        };
        preferences.apply(patch);
        self.write(SETTINGS_KEY, &preferences).await;
        preferences
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.read(key).await {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                warn!(target: "result_store", key, error = %err, "read failed; treating as empty");
                T::default()
            }
        }
    }

    /// Loads a partition for a read-modify-write. A corrupt document is
    /// replaced; an unreachable backend aborts the write so existing data is
    /// never clobbered by an empty map.
    async fn read_for_update<T: DeserializeOwned + Default>(&self, key: &str) -> Option<T> {
        match self.read(key).await {
            Ok(value) => Some(value.unwrap_or_default()),
            Err(StoreError::Serialization(err)) => {
                warn!(target: "result_store", key, error = %err, "discarding corrupt partition");
                Some(T::default())
            }
            Err(err) => {
                warn!(target: "result_store", key, error = %err, "read failed; skipping write");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(target: "result_store", key, error = %err, "failed to encode partition");
                return false;
            }
        };
        match self.backend.set(key, encoded).await {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "result_store", key, error = %err, "write failed; cached data not updated");
                false
            }
        }
    }
}

/// Removes entries in ascending `produced_at` order (insertion order breaks
/// ties) until at most `cap` remain. Returns how many were removed.
fn evict_oldest(summaries: &mut Summaries, cap: usize) -> usize {
    let mut evicted = 0;
    while summaries.len() > cap {
        let oldest = summaries
            .values()
            .enumerate()
            .min_by_key(|(index, result)| (result.produced_at, *index))
            .map(|(index, _)| index);
        match oldest {
            Some(index) => {
                summaries.shift_remove_index(index);
                evicted += 1;
            }
            None => break,
        }
    }
    evicted
}

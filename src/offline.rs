//! Connectivity tracking and the offline translation queue.
//!
//! While offline, resolution falls back to source text immediately and the
//! missed request is parked here. On reconnect the engine re-resolves the
//! queue and evicts items only once they actually resolved; see
//! `TranslationEngine::flush_pending`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::{CacheStore, now_ms};
use crate::error::TranslateResult;

pub type ConnectivityCallback = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTranslation {
    pub text: String,
    pub source: String,
    pub target: String,
    pub timestamp: u64,
}

pub struct OfflineManager {
    online: AtomicBool,
    callbacks: Mutex<Vec<ConnectivityCallback>>,
    pending: Mutex<HashMap<String, PendingTranslation>>,
}

impl Default for OfflineManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineManager {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            callbacks: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        let callbacks = self.callbacks.lock().expect("callbacks lock");
        for callback in callbacks.iter() {
            callback(online);
        }
    }

    pub fn on_connectivity_change(&self, callback: ConnectivityCallback) {
        self.callbacks.lock().expect("callbacks lock").push(callback);
    }

    /// Parks a request that could not be served offline. Returns false when
    /// the same request is already queued.
    pub fn enqueue_pending(&self, text: &str, source: &str, target: &str) -> bool {
        let key = pending_key(text, source, target);
        let mut pending = self.pending.lock().expect("pending lock");
        if pending.contains_key(&key) {
            return false;
        }
        pending.insert(
            key,
            PendingTranslation {
                text: text.to_string(),
                source: source.to_string(),
                target: target.to_string(),
                timestamp: now_ms(),
            },
        );
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }

    pub fn pending_snapshot(&self) -> Vec<PendingTranslation> {
        self.pending
            .lock()
            .expect("pending lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn remove_pending(&self, text: &str, source: &str, target: &str) {
        self.pending
            .lock()
            .expect("pending lock")
            .remove(&pending_key(text, source, target));
    }

    /// Primes the cache store with every known static translation so that
    /// resolution hits the cache before ever reaching the API. This is the
    /// offline-readiness bootstrap invoked at startup.
    pub fn preload_translations(
        &self,
        store: &CacheStore,
        source: &str,
        target: &str,
        translations: &HashMap<String, String>,
    ) -> usize {
        for (text, translated) in translations {
            store.cache_translation(text, source, target, translated);
        }
        store.cache_locale_data(target, translations);
        translations.len()
    }

    pub fn export_cache(&self, store: &CacheStore) -> TranslateResult<String> {
        store.export()
    }

    pub fn import_cache(&self, store: &CacheStore, blob: &str) -> TranslateResult<usize> {
        store.import(blob)
    }
}

fn pending_key(text: &str, source: &str, target: &str) -> String {
    format!("{text}_{source}_{target}")
}

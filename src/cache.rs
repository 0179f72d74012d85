//! Persistent translation cache.
//!
//! Every value is wrapped in a `{data, timestamp, version}` envelope; entries
//! whose schema version no longer matches or whose age exceeds the caller's
//! max-age are treated as absent and evicted on the read path. The backing
//! adapter is pluggable so the store works identically over a process-local
//! map and an on-disk JSON file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{TranslateError, TranslateResult};

pub const CACHE_SCHEMA_VERSION: u32 = 1;
const NAMESPACE: &str = "rustle";

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Envelope {
    data: serde_json::Value,
    timestamp: u64,
    version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub item_count: usize,
    pub approx_bytes: usize,
}

pub trait CacheAdapter: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

/// Process-local fallback adapter; nothing survives a restart.
#[derive(Default)]
pub struct MemoryAdapter {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheAdapter for MemoryAdapter {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().expect("cache map lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.map
            .lock()
            .expect("cache map lock")
            .insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.map.lock().expect("cache map lock").remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.map
            .lock()
            .expect("cache map lock")
            .keys()
            .cloned()
            .collect()
    }
}

/// Adapter persisting the whole namespace as one pretty-printed JSON file.
/// A missing or corrupt file starts the store empty rather than failing.
pub struct FileAdapter {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl FileAdapter {
    pub fn open(path: &Path) -> Self {
        let map = read_store_file(path).unwrap_or_else(|err| {
            tracing::warn!(
                "cache store at {} is unreadable, starting empty: {}",
                path.display(),
                err
            );
            HashMap::new()
        });
        Self {
            path: path.to_path_buf(),
            map: Mutex::new(map),
        }
    }

    fn persist(&self, map: &HashMap<String, String>) {
        if let Err(err) = write_store_file(&self.path, map) {
            tracing::warn!("failed to persist cache store: {}", err);
        }
    }
}

fn read_store_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path)?;
    let map = serde_json::from_str(&content)?;
    Ok(map)
}

fn write_store_file(path: &Path, map: &HashMap<String, String>) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let content = serde_json::to_string_pretty(map)?;
    fs::write(path, content)?;
    Ok(())
}

impl CacheAdapter for FileAdapter {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().expect("cache map lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut map = self.map.lock().expect("cache map lock");
        map.insert(key.to_string(), value);
        self.persist(&map);
    }

    fn remove(&self, key: &str) {
        let mut map = self.map.lock().expect("cache map lock");
        if map.remove(key).is_some() {
            self.persist(&map);
        }
    }

    fn keys(&self) -> Vec<String> {
        self.map
            .lock()
            .expect("cache map lock")
            .keys()
            .cloned()
            .collect()
    }
}

pub struct CacheStore {
    adapter: Box<dyn CacheAdapter>,
}

impl CacheStore {
    pub fn new(adapter: Box<dyn CacheAdapter>) -> Self {
        Self { adapter }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryAdapter::new()))
    }

    pub fn on_disk(path: &Path) -> Self {
        Self::new(Box::new(FileAdapter::open(path)))
    }

    pub fn cache_translation(&self, text: &str, source: &str, target: &str, value: &str) {
        self.set_envelope(
            &translation_key(source, target, text),
            serde_json::Value::String(value.to_string()),
        );
    }

    pub fn get_cached_translation(
        &self,
        text: &str,
        source: &str,
        target: &str,
        max_age_ms: u64,
    ) -> Option<String> {
        self.get_cached_translation_at(text, source, target, max_age_ms, now_ms())
    }

    pub(crate) fn get_cached_translation_at(
        &self,
        text: &str,
        source: &str,
        target: &str,
        max_age_ms: u64,
        now_ms: u64,
    ) -> Option<String> {
        let key = translation_key(source, target, text);
        let envelope = self.get_envelope(&key, max_age_ms, now_ms)?;
        envelope.data.as_str().map(|value| value.to_string())
    }

    pub fn cache_locale_data(&self, locale: &str, data: &HashMap<String, String>) {
        let Ok(value) = serde_json::to_value(data) else {
            return;
        };
        self.set_envelope(&locale_key(locale), value);
    }

    pub fn get_cached_locale_data(
        &self,
        locale: &str,
        max_age_ms: u64,
    ) -> Option<HashMap<String, String>> {
        self.get_cached_locale_data_at(locale, max_age_ms, now_ms())
    }

    pub(crate) fn get_cached_locale_data_at(
        &self,
        locale: &str,
        max_age_ms: u64,
        now_ms: u64,
    ) -> Option<HashMap<String, String>> {
        let envelope = self.get_envelope(&locale_key(locale), max_age_ms, now_ms)?;
        serde_json::from_value(envelope.data).ok()
    }

    pub fn clear(&self) {
        for key in self.namespaced_keys() {
            self.adapter.remove(&key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let mut item_count = 0;
        let mut approx_bytes = 0;
        for key in self.namespaced_keys() {
            if let Some(value) = self.adapter.get(&key) {
                item_count += 1;
                approx_bytes += key.len() + value.len();
            }
        }
        CacheStats {
            item_count,
            approx_bytes,
        }
    }

    /// Serializes the full cache namespace as one JSON blob for backup.
    pub fn export(&self) -> TranslateResult<String> {
        let mut out = serde_json::Map::new();
        for key in self.namespaced_keys() {
            let Some(raw) = self.adapter.get(&key) else {
                continue;
            };
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            out.insert(key, value);
        }
        Ok(serde_json::to_string_pretty(&serde_json::Value::Object(
            out,
        ))?)
    }

    /// Restores a blob produced by `export`. The whole payload is validated
    /// before the first write, so a malformed blob leaves the store
    /// untouched.
    pub fn import(&self, blob: &str) -> TranslateResult<usize> {
        let parsed: serde_json::Value = serde_json::from_str(blob)
            .map_err(|err| TranslateError::Validation(format!("import is not JSON: {err}")))?;
        let Some(entries) = parsed.as_object() else {
            return Err(TranslateError::Validation(
                "import must be a JSON object".to_string(),
            ));
        };
        let mut validated = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            if !key.starts_with(NAMESPACE) {
                return Err(TranslateError::Validation(format!(
                    "import key '{key}' is outside the cache namespace"
                )));
            }
            let envelope: Envelope = serde_json::from_value(value.clone()).map_err(|err| {
                TranslateError::Validation(format!("import entry '{key}' is malformed: {err}"))
            })?;
            validated.push((key.clone(), envelope));
        }
        let count = validated.len();
        for (key, envelope) in validated {
            if let Ok(raw) = serde_json::to_string(&envelope) {
                self.adapter.set(&key, raw);
            }
        }
        Ok(count)
    }

    fn set_envelope(&self, key: &str, data: serde_json::Value) {
        let envelope = Envelope {
            data,
            timestamp: now_ms(),
            version: CACHE_SCHEMA_VERSION,
        };
        if let Ok(raw) = serde_json::to_string(&envelope) {
            self.adapter.set(key, raw);
        }
    }

    fn get_envelope(&self, key: &str, max_age_ms: u64, now_ms: u64) -> Option<Envelope> {
        let raw = self.adapter.get(key)?;
        let Ok(envelope) = serde_json::from_str::<Envelope>(&raw) else {
            self.adapter.remove(key);
            return None;
        };
        if envelope.version != CACHE_SCHEMA_VERSION {
            self.adapter.remove(key);
            return None;
        }
        if now_ms.saturating_sub(envelope.timestamp) > max_age_ms {
            self.adapter.remove(key);
            return None;
        }
        Some(envelope)
    }

    fn namespaced_keys(&self) -> Vec<String> {
        let prefix = format!("{NAMESPACE}:");
        self.adapter
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect()
    }
}

fn translation_key(source: &str, target: &str, text: &str) -> String {
    format!("{NAMESPACE}:t:{source}:{target}:{text}")
}

fn locale_key(locale: &str) -> String {
    format!("{NAMESPACE}:l:{locale}")
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 3_600_000;

    #[test]
    fn translation_round_trip() {
        let store = CacheStore::in_memory();
        store.cache_translation("Hello", "en", "es", "Hola");
        assert_eq!(
            store.get_cached_translation("Hello", "en", "es", HOUR_MS),
            Some("Hola".to_string())
        );
        assert_eq!(store.get_cached_translation("Hello", "en", "fr", HOUR_MS), None);
    }

    #[test]
    fn entries_expire_after_max_age() {
        let store = CacheStore::in_memory();
        store.cache_translation("Hello", "en", "es", "Hola");
        let later = now_ms() + 2 * HOUR_MS;
        assert_eq!(
            store.get_cached_translation_at("Hello", "en", "es", HOUR_MS, later),
            None
        );
        // Lazy eviction removed the entry entirely.
        assert_eq!(store.stats().item_count, 0);
    }

    #[test]
    fn schema_version_mismatch_is_a_miss() {
        let adapter = MemoryAdapter::new();
        let stale = Envelope {
            data: serde_json::Value::String("Hola".to_string()),
            timestamp: now_ms(),
            version: CACHE_SCHEMA_VERSION + 1,
        };
        adapter.set(
            &translation_key("en", "es", "Hello"),
            serde_json::to_string(&stale).unwrap(),
        );
        let store = CacheStore::new(Box::new(adapter));
        assert_eq!(store.get_cached_translation("Hello", "en", "es", HOUR_MS), None);
    }

    #[test]
    fn locale_data_round_trip() {
        let store = CacheStore::in_memory();
        let mut data = HashMap::new();
        data.insert("abc123".to_string(), "Hola".to_string());
        store.cache_locale_data("es", &data);
        assert_eq!(store.get_cached_locale_data("es", HOUR_MS), Some(data));
    }

    #[test]
    fn stats_count_namespaced_entries() {
        let store = CacheStore::in_memory();
        store.cache_translation("Hello", "en", "es", "Hola");
        store.cache_translation("World", "en", "es", "Mundo");
        let stats = store.stats();
        assert_eq!(stats.item_count, 2);
        assert!(stats.approx_bytes > 0);
        store.clear();
        assert_eq!(store.stats().item_count, 0);
    }

    #[test]
    fn export_import_round_trip() {
        let store = CacheStore::in_memory();
        store.cache_translation("Hello", "en", "es", "Hola");
        let blob = store.export().unwrap();

        let restored = CacheStore::in_memory();
        assert_eq!(restored.import(&blob).unwrap(), 1);
        assert_eq!(
            restored.get_cached_translation("Hello", "en", "es", HOUR_MS),
            Some("Hola".to_string())
        );
    }

    #[test]
    fn import_rejects_malformed_blob_without_mutation() {
        let store = CacheStore::in_memory();
        store.cache_translation("Hello", "en", "es", "Hola");

        let err = store.import("not json").unwrap_err();
        assert!(matches!(err, TranslateError::Validation(_)));

        let bad_entry = "{\"rustle:t:en:es:x\": {\"data\": \"y\"}}";
        let err = store.import(bad_entry).unwrap_err();
        assert!(matches!(err, TranslateError::Validation(_)));

        assert_eq!(store.stats().item_count, 1);
    }

    #[test]
    fn file_adapter_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        {
            let store = CacheStore::on_disk(&path);
            store.cache_translation("Hello", "en", "es", "Hola");
        }
        let store = CacheStore::on_disk(&path);
        assert_eq!(
            store.get_cached_translation("Hello", "en", "es", HOUR_MS),
            Some("Hola".to_string())
        );
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();
        let store = CacheStore::on_disk(&path);
        assert_eq!(store.stats().item_count, 0);
    }
}

//! Translation resolution.
//!
//! A resolution walks an ordered waterfall: static locale data, then the
//! persistent cache, then the in-flight map, then the offline queue, and only
//! then the live API through a debounced batch. Identical concurrent requests
//! share one outbound call; the in-flight entry is removed by a drop guard so
//! cleanup happens on success, failure, and cancellation alike.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::api::{BatchEntry, BatchRequest, MAX_BATCH_ENTRIES, TranslateBackend};
use crate::cache::CacheStore;
use crate::cleaner;
use crate::error::{TranslateError, TranslateResult};
use crate::fingerprint;
use crate::hooks::{HookContext, HookHandler, HookKind, HookRegistry};
use crate::offline::OfflineManager;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub source_locale: String,
    pub max_retries: u32,
    pub cache_max_age_ms: u64,
    pub fallback_to_source: bool,
    pub debounce_ms: u64,
    pub backoff_base_ms: u64,
    pub model: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            source_locale: "en".to_string(),
            max_retries: 3,
            cache_max_age_ms: 7 * 24 * 3_600_000,
            fallback_to_source: true,
            debounce_ms: 100,
            backoff_base_ms: 1_000,
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    text: String,
    source: String,
    target: String,
}

type SharedResolution = Shared<BoxFuture<'static, TranslateResult<String>>>;

struct BatchWaiter {
    id: String,
    text: String,
    sender: oneshot::Sender<TranslateResult<String>>,
}

struct PendingBatch {
    waiters: Vec<BatchWaiter>,
}

struct EngineInner {
    backend: Arc<dyn TranslateBackend>,
    store: Arc<CacheStore>,
    offline: Arc<OfflineManager>,
    hooks: HookRegistry,
    options: EngineOptions,
    static_locales: Mutex<HashMap<String, HashMap<String, String>>>,
    in_flight: Mutex<HashMap<RequestKey, SharedResolution>>,
    batches: Mutex<HashMap<String, PendingBatch>>,
    active_batches: Mutex<HashMap<String, String>>,
    sequence: AtomicU64,
}

#[derive(Clone)]
pub struct TranslationEngine {
    inner: Arc<EngineInner>,
}

impl TranslationEngine {
    pub fn new(
        backend: Arc<dyn TranslateBackend>,
        store: Arc<CacheStore>,
        offline: Arc<OfflineManager>,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                backend,
                store,
                offline,
                hooks: HookRegistry::new(),
                options,
                static_locales: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                batches: Mutex::new(HashMap::new()),
                active_batches: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn register_hook(&self, kind: HookKind, handler: HookHandler) {
        self.inner.hooks.register(kind, handler);
    }

    /// Installs static locale data and primes the cache so lookups stay
    /// local. `source_map` is the source-language locale file (fingerprint →
    /// source text), `target_map` the translated one (fingerprint →
    /// translation).
    pub fn load_static_locale(
        &self,
        target: &str,
        source_map: &HashMap<String, String>,
        target_map: &HashMap<String, String>,
    ) {
        let mut table = target_map.clone();
        let mut joined = HashMap::new();
        for (fp, translated) in target_map {
            if let Some(text) = source_map.get(fp) {
                joined.insert(text.clone(), translated.clone());
                table.insert(text.clone(), translated.clone());
            }
        }
        self.inner.offline.preload_translations(
            &self.inner.store,
            &self.inner.options.source_locale,
            target,
            &joined,
        );
        self.inner
            .static_locales
            .lock()
            .expect("static locales lock")
            .insert(target.to_string(), table);
    }

    /// Resolves one text fragment for `target`, walking the full waterfall.
    pub async fn resolve(&self, text: &str, target: &str) -> TranslateResult<String> {
        let inner = &self.inner;
        let source = inner.options.source_locale.clone();
        if target == source || !fingerprint::is_translatable_text(text) {
            return Ok(text.to_string());
        }

        let context = HookContext {
            text,
            source: &source,
            target,
            detail: None,
        };
        let effective = inner
            .hooks
            .dispatch(HookKind::BeforeTranslate, &context)
            .unwrap_or_else(|| text.to_string());

        if let Some(hit) = inner.static_lookup(&effective, target) {
            return Ok(hit);
        }

        if let Some(hit) = inner.store.get_cached_translation(
            &effective,
            &source,
            target,
            inner.options.cache_max_age_ms,
        ) {
            inner.hooks.dispatch(HookKind::CacheHit, &context);
            return Ok(hit);
        }
        inner.hooks.dispatch(HookKind::CacheMiss, &context);

        if !inner.offline.is_online() {
            inner.offline.enqueue_pending(&effective, &source, target);
            return Ok(text.to_string());
        }

        let key = RequestKey {
            text: effective.clone(),
            source: source.clone(),
            target: target.to_string(),
        };
        let resolution = {
            let mut in_flight = inner.in_flight.lock().expect("in-flight lock");
            match in_flight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let fut = live_resolution(self.inner.clone(), key.clone());
                    in_flight.insert(key, fut.clone());
                    fut
                }
            }
        };
        let result = resolution.await;

        match result {
            Ok(translated) => {
                let context = HookContext {
                    text: &translated,
                    source: &source,
                    target,
                    detail: None,
                };
                Ok(inner
                    .hooks
                    .dispatch(HookKind::AfterTranslate, &context)
                    .unwrap_or(translated))
            }
            Err(err) => Err(err),
        }
    }

    /// Batch resolution for callers that already hold a set of fragments
    /// (one page render, one extraction run). Missing entries go to the wire
    /// in one call; `request_key` lets the caller cancel the whole batch.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        target: &str,
        request_key: Option<&str>,
    ) -> TranslateResult<HashMap<String, String>> {
        let inner = &self.inner;
        let source = inner.options.source_locale.clone();
        let mut results = HashMap::new();
        let mut missing = Vec::new();

        for text in texts {
            if target == source || !fingerprint::is_translatable_text(text) {
                results.insert(text.clone(), text.clone());
                continue;
            }
            if let Some(hit) = inner.static_lookup(text, target) {
                results.insert(text.clone(), hit);
                continue;
            }
            if let Some(hit) = inner.store.get_cached_translation(
                text,
                &source,
                target,
                inner.options.cache_max_age_ms,
            ) {
                results.insert(text.clone(), hit);
                continue;
            }
            missing.push(text.clone());
        }

        if missing.is_empty() {
            return Ok(results);
        }

        if !inner.offline.is_online() {
            for text in missing {
                inner.offline.enqueue_pending(&text, &source, target);
                results.insert(text.clone(), text);
            }
            return Ok(results);
        }

        for chunk in missing.chunks(MAX_BATCH_ENTRIES) {
            let mut ids = HashMap::new();
            let entries: Vec<BatchEntry> = chunk
                .iter()
                .map(|text| {
                    let id = fingerprint::fingerprint(text);
                    ids.insert(id.clone(), text.clone());
                    BatchEntry::new(id, text.clone())
                })
                .collect();
            let request = BatchRequest {
                entries,
                source: source.clone(),
                target: target.to_string(),
                model: inner.options.model.clone(),
                request_key: request_key.map(|key| key.to_string()),
            };

            match inner.call_with_retry(request).await {
                Ok(translations) => {
                    for (id, text) in &ids {
                        match translations.get(id) {
                            Some(value) => {
                                let cleaned = cleaner::clean(value);
                                inner.store.cache_translation(text, &source, target, &cleaned);
                                results.insert(text.clone(), cleaned);
                            }
                            None => {
                                results.insert(text.clone(), text.clone());
                            }
                        }
                    }
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    inner.dispatch_error(chunk.first().map(String::as_str).unwrap_or(""), target, &err);
                    if !inner.options.fallback_to_source {
                        return Err(err);
                    }
                    for text in chunk {
                        results.insert(text.clone(), text.clone());
                    }
                }
            }
        }

        Ok(results)
    }

    /// Aborts the in-flight wire request registered under `request_key`.
    pub fn cancel_request(&self, request_key: &str) {
        self.inner.backend.cancel(request_key);
    }

    /// Cancels every queued and in-flight batch tied to `previous` and lets
    /// hooks observe the switch to `next`. Queued waiters reject with a
    /// distinguishable cancelled error so UI callers can fall back to source
    /// text instead of reporting a failure.
    pub fn notify_locale_change(&self, previous: &str, next: &str) {
        let inner = &self.inner;
        if let Some(batch) = inner
            .batches
            .lock()
            .expect("batches lock")
            .remove(previous)
        {
            for waiter in batch.waiters {
                let _ = waiter.sender.send(Err(TranslateError::Cancelled));
            }
        }
        let keys: Vec<String> = inner
            .active_batches
            .lock()
            .expect("active batches lock")
            .iter()
            .filter(|(_, target)| target.as_str() == previous)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            inner.backend.cancel(&key);
        }
        inner.hooks.dispatch(
            HookKind::LocaleChange,
            &HookContext {
                text: "",
                source: previous,
                target: next,
                detail: Some(next),
            },
        );
    }

    /// Re-resolves every queued offline item and evicts only those that now
    /// have a confirmed (cached) translation. Failures stay queued.
    pub async fn flush_pending(&self) -> usize {
        let inner = &self.inner;
        let items = inner.offline.pending_snapshot();
        let mut flushed = 0;
        for item in items {
            if let Err(err) = self.resolve(&item.text, &item.target).await {
                tracing::warn!(
                    "failed to flush pending translation for '{}': {}",
                    item.text,
                    err
                );
                continue;
            }
            let confirmed = inner.static_lookup(&item.text, &item.target).is_some()
                || inner
                    .store
                    .get_cached_translation(
                        &item.text,
                        &item.source,
                        &item.target,
                        inner.options.cache_max_age_ms,
                    )
                    .is_some();
            if confirmed {
                inner
                    .offline
                    .remove_pending(&item.text, &item.source, &item.target);
                flushed += 1;
            }
        }
        flushed
    }

    /// Registers a connectivity callback that drains the offline queue in a
    /// background task whenever the manager transitions back online.
    pub fn attach_connectivity_flush(&self) {
        let engine = self.clone();
        self.inner
            .offline
            .on_connectivity_change(Box::new(move |online| {
                if online {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        let flushed = engine.flush_pending().await;
                        tracing::debug!("flushed {} pending translations", flushed);
                    });
                }
            }));
    }
}

impl EngineInner {
    fn static_lookup(&self, text: &str, target: &str) -> Option<String> {
        let locales = self.static_locales.lock().expect("static locales lock");
        let table = locales.get(target)?;
        table
            .get(&fingerprint::fingerprint(text))
            .or_else(|| table.get(text))
            .cloned()
    }

    fn dispatch_error(&self, text: &str, target: &str, err: &TranslateError) {
        let detail = err.to_string();
        self.hooks.dispatch(
            HookKind::Error,
            &HookContext {
                text,
                source: &self.options.source_locale,
                target,
                detail: Some(&detail),
            },
        );
    }

    async fn call_with_retry(
        &self,
        request: BatchRequest,
    ) -> TranslateResult<HashMap<String, String>> {
        let mut attempt = 0u32;
        loop {
            match self.backend.translate_batch(request.clone()).await {
                Ok(translations) => return Ok(translations),
                Err(err) if err.is_cancelled() || err.is_quota_exceeded() => return Err(err),
                Err(err) if err.is_retryable() && attempt < self.options.max_retries => {
                    let delay = self.options.backoff_base_ms.saturating_mul(1 << attempt);
                    tracing::debug!(
                        "translation attempt {} failed ({}); retrying in {}ms",
                        attempt + 1,
                        err,
                        delay
                    );
                    sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

struct InFlightGuard {
    inner: Arc<EngineInner>,
    key: RequestKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .expect("in-flight lock")
            .remove(&self.key);
    }
}

/// Builds the shared future for one live resolution. The guard travels with
/// the future so the in-flight entry disappears no matter how it ends.
fn live_resolution(inner: Arc<EngineInner>, key: RequestKey) -> SharedResolution {
    let guard = InFlightGuard {
        inner: inner.clone(),
        key: key.clone(),
    };
    async move {
        let _guard = guard;
        let RequestKey {
            text,
            source,
            target,
        } = key;
        let mut attempt = 0u32;
        let outcome = loop {
            let receiver = schedule_into_batch(&inner, &text, &target);
            let result = match receiver.await {
                Ok(result) => result,
                Err(_) => Err(TranslateError::Network(
                    "batch dispatcher dropped".to_string(),
                )),
            };
            match result {
                Ok(value) => break Ok(value),
                Err(err) if err.is_cancelled() || err.is_quota_exceeded() => break Err(err),
                Err(err) if err.is_retryable() && attempt < inner.options.max_retries => {
                    let delay = inner.options.backoff_base_ms.saturating_mul(1 << attempt);
                    sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        };
        match outcome {
            Ok(value) => {
                let cleaned = cleaner::clean(&value);
                inner
                    .store
                    .cache_translation(&text, &source, &target, &cleaned);
                Ok(cleaned)
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                inner.dispatch_error(&text, &target, &err);
                if let Some(hit) = inner.static_lookup(&text, &target) {
                    return Ok(hit);
                }
                if inner.options.fallback_to_source {
                    return Ok(text);
                }
                Err(err)
            }
        }
    }
    .boxed()
    .shared()
}

/// Joins the debounce window for `target`, creating it when absent. The
/// first request spawns the dispatch task; everything arriving inside the
/// window rides the same outbound call.
fn schedule_into_batch(
    inner: &Arc<EngineInner>,
    text: &str,
    target: &str,
) -> oneshot::Receiver<TranslateResult<String>> {
    let (sender, receiver) = oneshot::channel();
    let waiter = BatchWaiter {
        id: fingerprint::fingerprint(text),
        text: text.to_string(),
        sender,
    };

    let mut batches = inner.batches.lock().expect("batches lock");
    if let Some(pending) = batches.get_mut(target) {
        pending.waiters.push(waiter);
        return receiver;
    }
    batches.insert(
        target.to_string(),
        PendingBatch {
            waiters: vec![waiter],
        },
    );
    drop(batches);

    let inner = inner.clone();
    let target = target.to_string();
    tokio::spawn(async move {
        sleep(Duration::from_millis(inner.options.debounce_ms)).await;
        fire_batch(inner, target).await;
    });
    receiver
}

async fn fire_batch(inner: Arc<EngineInner>, target: String) {
    let Some(batch) = inner.batches.lock().expect("batches lock").remove(&target) else {
        return;
    };
    let mut waiters_by_id: HashMap<String, Vec<BatchWaiter>> = HashMap::new();
    let mut entries = Vec::new();
    for waiter in batch.waiters {
        let slot = waiters_by_id.entry(waiter.id.clone()).or_default();
        if slot.is_empty() {
            entries.push(BatchEntry::new(waiter.id.clone(), waiter.text.clone()));
        }
        slot.push(waiter);
    }

    let request_key = format!(
        "rustle-batch:{}:{}",
        target,
        inner.sequence.fetch_add(1, Ordering::SeqCst)
    );
    inner
        .active_batches
        .lock()
        .expect("active batches lock")
        .insert(request_key.clone(), target.clone());

    let request = BatchRequest {
        entries,
        source: inner.options.source_locale.clone(),
        target: target.clone(),
        model: inner.options.model.clone(),
        request_key: Some(request_key.clone()),
    };
    let result = inner.backend.translate_batch(request).await;

    inner
        .active_batches
        .lock()
        .expect("active batches lock")
        .remove(&request_key);

    match result {
        Ok(translations) => {
            for (id, waiters) in waiters_by_id {
                let outcome = translations
                    .get(&id)
                    .map(|value| cleaner::clean(value))
                    .ok_or_else(|| TranslateError::MissingTranslation(id.clone()));
                for waiter in waiters {
                    let _ = waiter.sender.send(outcome.clone());
                }
            }
        }
        Err(err) => {
            for waiters in waiters_by_id.into_values() {
                for waiter in waiters {
                    let _ = waiter.sender.send(Err(err.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct MockBackend {
        calls: AtomicUsize,
        fail_with: Mutex<Option<TranslateError>>,
        fail_times: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_with: Mutex::new(None),
                fail_times: AtomicUsize::new(0),
            })
        }

        fn failing(err: TranslateError, times: usize) -> Arc<Self> {
            let backend = Self::new();
            *backend.fail_with.lock().unwrap() = Some(err);
            backend.fail_times.store(times, Ordering::SeqCst);
            backend
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TranslateBackend for MockBackend {
        fn translate_batch(&self, request: BatchRequest) -> crate::api::BackendFuture {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let failure = if call < self.fail_times.load(Ordering::SeqCst) {
                self.fail_with.lock().unwrap().clone()
            } else {
                None
            };
            Box::pin(async move {
                if let Some(err) = failure {
                    return Err(err);
                }
                Ok(request
                    .entries
                    .iter()
                    .map(|entry| {
                        (
                            entry.id.clone(),
                            format!("{}:{}", request.target, entry.text),
                        )
                    })
                    .collect())
            })
        }
    }

    fn engine_with(backend: Arc<MockBackend>) -> TranslationEngine {
        let mut options = EngineOptions::default();
        options.debounce_ms = 10;
        options.backoff_base_ms = 1;
        TranslationEngine::new(
            backend,
            Arc::new(CacheStore::in_memory()),
            Arc::new(OfflineManager::new()),
            options,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_identical_resolves_share_one_call() {
        let backend = MockBackend::new();
        let engine = engine_with(backend.clone());

        let (a, b) = tokio::join!(engine.resolve("Hello", "es"), engine.resolve("Hello", "es"));
        assert_eq!(a.unwrap(), "es:Hello");
        assert_eq!(b.unwrap(), "es:Hello");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_distinct_texts_join_one_batch() {
        let backend = MockBackend::new();
        let engine = engine_with(backend.clone());

        let (a, b) = tokio::join!(engine.resolve("Hello", "es"), engine.resolve("World", "es"));
        assert_eq!(a.unwrap(), "es:Hello");
        assert_eq!(b.unwrap(), "es:World");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn static_data_wins_over_the_wire() {
        let backend = MockBackend::new();
        let engine = engine_with(backend.clone());

        let fp = fingerprint::fingerprint("Welcome");
        let mut source_map = HashMap::new();
        source_map.insert(fp.clone(), "Welcome".to_string());
        let mut target_map = HashMap::new();
        target_map.insert(fp, "Bienvenido".to_string());
        engine.load_static_locale("es", &source_map, &target_map);

        assert_eq!(engine.resolve("Welcome", "es").await.unwrap(), "Bienvenido");
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn second_resolve_hits_the_cache() {
        let backend = MockBackend::new();
        let engine = engine_with(backend.clone());

        assert_eq!(engine.resolve("Hello", "es").await.unwrap(), "es:Hello");
        assert_eq!(engine.resolve("Hello", "es").await.unwrap(), "es:Hello");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn source_locale_and_untranslatable_text_pass_through() {
        let backend = MockBackend::new();
        let engine = engine_with(backend.clone());

        assert_eq!(engine.resolve("Hello", "en").await.unwrap(), "Hello");
        assert_eq!(engine.resolve("1234", "es").await.unwrap(), "1234");
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn offline_resolution_falls_back_and_queues() {
        let backend = MockBackend::new();
        let offline = Arc::new(OfflineManager::new());
        let mut options = EngineOptions::default();
        options.debounce_ms = 10;
        let engine = TranslationEngine::new(
            backend.clone(),
            Arc::new(CacheStore::in_memory()),
            offline.clone(),
            options,
        );

        offline.set_online(false);
        assert_eq!(engine.resolve("Hello", "es").await.unwrap(), "Hello");
        assert_eq!(offline.pending_count(), 1);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reconnect_flush_drains_the_queue() {
        let backend = MockBackend::new();
        let offline = Arc::new(OfflineManager::new());
        let mut options = EngineOptions::default();
        options.debounce_ms = 10;
        options.backoff_base_ms = 1;
        let engine = TranslationEngine::new(
            backend.clone(),
            Arc::new(CacheStore::in_memory()),
            offline.clone(),
            options,
        );

        offline.set_online(false);
        engine.resolve("Hello", "es").await.unwrap();
        assert_eq!(offline.pending_count(), 1);

        offline.set_online(true);
        let flushed = engine.flush_pending().await;
        assert_eq!(flushed, 1);
        assert_eq!(offline.pending_count(), 0);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn transport_failures_retry_then_fall_back() {
        let backend =
            MockBackend::failing(TranslateError::Network("connection reset".to_string()), usize::MAX);
        let mut options = EngineOptions::default();
        options.debounce_ms = 1;
        options.backoff_base_ms = 1;
        options.max_retries = 2;
        let engine = TranslationEngine::new(
            backend.clone(),
            Arc::new(CacheStore::in_memory()),
            Arc::new(OfflineManager::new()),
            options,
        );

        assert_eq!(engine.resolve("Hello", "es").await.unwrap(), "Hello");
        assert_eq!(backend.call_count(), 3); // initial attempt + 2 retries
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn quota_errors_skip_the_retry_loop() {
        let backend = MockBackend::failing(
            TranslateError::Quota {
                code: Some("quota_exceeded".to_string()),
                detail: None,
            },
            usize::MAX,
        );
        let mut options = EngineOptions::default();
        options.debounce_ms = 1;
        options.backoff_base_ms = 1;
        options.fallback_to_source = false;
        let engine = TranslationEngine::new(
            backend.clone(),
            Arc::new(CacheStore::in_memory()),
            Arc::new(OfflineManager::new()),
            options,
        );

        let err = engine.resolve("Hello", "es").await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_is_not_swallowed_by_fallback() {
        let backend = MockBackend::failing(TranslateError::Cancelled, usize::MAX);
        let mut options = EngineOptions::default();
        options.debounce_ms = 1;
        options.backoff_base_ms = 1;
        let engine = TranslationEngine::new(
            backend.clone(),
            Arc::new(CacheStore::in_memory()),
            Arc::new(OfflineManager::new()),
            options,
        );

        let err = engine.resolve("Hello", "es").await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn locale_change_cancels_queued_batches() {
        let backend = MockBackend::new();
        let mut options = EngineOptions::default();
        options.debounce_ms = 500;
        let engine = TranslationEngine::new(
            backend.clone(),
            Arc::new(CacheStore::in_memory()),
            Arc::new(OfflineManager::new()),
            options,
        );

        let resolving = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.resolve("Hello", "es").await })
        };
        sleep(Duration::from_millis(50)).await;
        engine.notify_locale_change("es", "fr");
        let err = resolving.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batch_failure_falls_back_to_source_for_every_text() {
        let backend =
            MockBackend::failing(TranslateError::Network("unreachable".to_string()), usize::MAX);
        let mut options = EngineOptions::default();
        options.debounce_ms = 1;
        options.backoff_base_ms = 1;
        options.max_retries = 1;
        let engine = TranslationEngine::new(
            backend.clone(),
            Arc::new(CacheStore::in_memory()),
            Arc::new(OfflineManager::new()),
            options,
        );

        let texts = vec!["Hello".to_string(), "World".to_string()];
        let results = engine.translate_batch(&texts, "es", None).await.unwrap();
        assert_eq!(results.get("Hello").map(String::as_str), Some("Hello"));
        assert_eq!(results.get("World").map(String::as_str), Some("World"));
    }

    #[tokio::test]
    async fn translate_batch_translates_and_caches() {
        let backend = MockBackend::new();
        let store = Arc::new(CacheStore::in_memory());
        let mut options = EngineOptions::default();
        options.debounce_ms = 1;
        let engine = TranslationEngine::new(
            backend.clone(),
            store.clone(),
            Arc::new(OfflineManager::new()),
            options,
        );

        let texts = vec!["Hello".to_string(), "World".to_string()];
        let results = engine.translate_batch(&texts, "es", Some("page-1")).await.unwrap();
        assert_eq!(results.get("Hello").map(String::as_str), Some("es:Hello"));
        assert_eq!(backend.call_count(), 1);
        assert_eq!(
            store.get_cached_translation("World", "en", "es", 60_000),
            Some("es:World".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hooks_observe_and_rewrite() {
        let backend = MockBackend::new();
        let engine = engine_with(backend.clone());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        engine.register_hook(
            HookKind::CacheHit,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }),
        );
        engine.register_hook(
            HookKind::AfterTranslate,
            Box::new(|ctx| Ok(Some(ctx.text.to_uppercase()))),
        );

        assert_eq!(engine.resolve("Hello", "es").await.unwrap(), "ES:HELLO");
        engine.resolve("Hello", "es").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

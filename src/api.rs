//! HTTP client for the remote translation service.
//!
//! The client validates its construction inputs up front, applies a local
//! sliding-window rate limit before any network call, and surfaces quota
//! conditions as a distinct typed error. It never retries; retry policy
//! belongs to the resolution engine.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::{AbortHandle, Abortable};
use serde::Deserialize;
use serde_json::json;

use crate::cleaner;
use crate::error::{QuotaDetail, TranslateError, TranslateResult};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const MAX_BATCH_ENTRIES: usize = 100;
const MAX_TEXT_CHARS: usize = 5_000;
const MIN_KEY_LEN: usize = 16;
const MAX_KEY_LEN: usize = 256;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_requests_per_minute: usize,
    pub harden: bool,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_requests_per_minute: 60,
            harden: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub id: String,
    pub text: String,
    pub tags: Vec<String>,
    pub file: Option<String>,
}

impl BatchEntry {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            tags: Vec::new(),
            file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub entries: Vec<BatchEntry>,
    pub source: String,
    pub target: String,
    pub model: Option<String>,
    pub request_key: Option<String>,
}

pub type BackendFuture =
    Pin<Box<dyn Future<Output = TranslateResult<HashMap<String, String>>> + Send>>;

/// Seam between the resolution engine / extractor and the wire. Tests plug
/// in mock backends here.
pub trait TranslateBackend: Send + Sync {
    fn translate_batch(&self, request: BatchRequest) -> BackendFuture;

    /// Aborts the in-flight request registered under `request_key`, if the
    /// backend tracks one. The default is a no-op for backends with nothing
    /// to abort.
    fn cancel(&self, _request_key: &str) {}
}

#[derive(Debug)]
struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Mutex<VecDeque<Instant>>,
    max_per_window: usize,
    in_flight: Mutex<HashMap<String, (u64, AbortHandle)>>,
    sequence: AtomicU64,
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> TranslateResult<Self> {
        validate_api_key(&config.api_key)?;
        validate_base_url(&config.base_url, config.harden)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| TranslateError::Network(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                api_key: config.api_key,
                limiter: Mutex::new(VecDeque::new()),
                max_per_window: config.max_requests_per_minute.max(1),
                in_flight: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
            }),
        })
    }

    /// Aborts the in-flight request registered under `request_key`, if any.
    pub fn cancel_request(&self, request_key: &str) {
        let mut in_flight = self.inner.in_flight.lock().expect("in-flight lock");
        if let Some((_, handle)) = in_flight.remove(request_key) {
            handle.abort();
        }
    }

    pub async fn translate_batch(
        &self,
        entries: Vec<BatchEntry>,
        source: &str,
        target: &str,
        model: Option<&str>,
        request_key: Option<&str>,
    ) -> TranslateResult<HashMap<String, String>> {
        if entries.is_empty() {
            return Err(TranslateError::Validation("batch is empty".to_string()));
        }
        if entries.len() > MAX_BATCH_ENTRIES {
            return Err(TranslateError::Validation(format!(
                "batch of {} entries exceeds the cap of {}",
                entries.len(),
                MAX_BATCH_ENTRIES
            )));
        }
        validate_locale(source)?;
        validate_locale(target)?;

        let mut wire_entries = Vec::with_capacity(entries.len());
        for entry in &entries {
            let text = sanitize_outgoing_text(&entry.text)?;
            let mut context = serde_json::Map::new();
            if !entry.tags.is_empty() {
                context.insert("tags".to_string(), json!(entry.tags));
            }
            if let Some(file) = &entry.file {
                context.insert("file".to_string(), json!(file));
            }
            let mut wire = serde_json::Map::new();
            wire.insert("id".to_string(), json!(entry.id));
            wire.insert("text".to_string(), json!(text));
            if !context.is_empty() {
                wire.insert("context".to_string(), serde_json::Value::Object(context));
            }
            wire_entries.push(serde_json::Value::Object(wire));
        }

        self.check_rate_limit()?;

        let mut body = json!({
            "entries": wire_entries,
            "sourceLanguage": source,
            "targetLanguage": target,
        });
        if let Some(model) = model {
            body["model"] = json!(model);
        }

        let correlation_id = self.next_correlation_id();
        let url = format!("{}/translate/batch", self.inner.base_url);
        let request = self
            .inner
            .http
            .post(&url)
            .bearer_auth(self.inner.api_key.clone())
            .header("x-request-id", correlation_id)
            .json(&body)
            .send();

        let response = match request_key {
            Some(key) => {
                let (handle, registration) = AbortHandle::new_pair();
                let token = self.register_in_flight(key, handle);
                let result = Abortable::new(request, registration).await;
                self.clear_in_flight(key, token);
                match result {
                    Ok(sent) => sent?,
                    Err(_aborted) => return Err(TranslateError::Cancelled),
                }
            }
            None => request.await?,
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &text));
        }

        let payload: BatchResponse = serde_json::from_str(&text).map_err(|err| {
            TranslateError::Serialization(format!("failed to parse batch response: {err}"))
        })?;
        if !payload.success {
            return Err(TranslateError::Api {
                status: status.as_u16(),
                message: payload
                    .error
                    .unwrap_or_else(|| "translation service reported failure".to_string()),
            });
        }

        Ok(payload
            .translations
            .into_iter()
            .map(|(id, value)| (id, cleaner::clean(&value)))
            .collect())
    }

    pub async fn translate_single(
        &self,
        text: &str,
        source: &str,
        target: &str,
        model: Option<&str>,
        tags: Vec<String>,
    ) -> TranslateResult<String> {
        let mut entry = BatchEntry::new("single", text);
        entry.tags = tags;
        let mut translations = self
            .translate_batch(vec![entry], source, target, model, None)
            .await?;
        translations
            .remove("single")
            .ok_or_else(|| TranslateError::MissingTranslation(text.to_string()))
    }

    pub async fn health(&self) -> TranslateResult<bool> {
        let url = format!("{}/health", self.inner.base_url);
        let response = self.inner.http.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    pub async fn models(&self) -> TranslateResult<Vec<String>> {
        let url = format!("{}/models", self.inner.base_url);
        let response = self
            .inner
            .http
            .get(&url)
            .bearer_auth(self.inner.api_key.clone())
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &text));
        }
        let payload: ModelsResponse = serde_json::from_str(&text).map_err(|err| {
            TranslateError::Serialization(format!("failed to parse models response: {err}"))
        })?;
        Ok(payload.models)
    }

    fn check_rate_limit(&self) -> TranslateResult<()> {
        let mut window = self.inner.limiter.lock().expect("rate limiter lock");
        let now = Instant::now();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > RATE_LIMIT_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.inner.max_per_window {
            return Err(TranslateError::RateLimited);
        }
        window.push_back(now);
        Ok(())
    }

    fn next_correlation_id(&self) -> String {
        let seq = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let seed = format!("{}:{}", seq, crate::cache::now_ms());
        let digest = format!("{:x}", md5::compute(seed.as_bytes()));
        format!("req-{}", &digest[..16])
    }

    fn register_in_flight(&self, key: &str, handle: AbortHandle) -> u64 {
        let token = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let mut in_flight = self.inner.in_flight.lock().expect("in-flight lock");
        if let Some((_, previous)) = in_flight.insert(key.to_string(), (token, handle)) {
            previous.abort();
        }
        token
    }

    fn clear_in_flight(&self, key: &str, token: u64) {
        let mut in_flight = self.inner.in_flight.lock().expect("in-flight lock");
        if let Some((current, _)) = in_flight.get(key) {
            if *current == token {
                in_flight.remove(key);
            }
        }
    }
}

impl TranslateBackend for ApiClient {
    fn translate_batch(&self, request: BatchRequest) -> BackendFuture {
        let client = self.clone();
        Box::pin(async move {
            client
                .translate_batch(
                    request.entries,
                    &request.source,
                    &request.target,
                    request.model.as_deref(),
                    request.request_key.as_deref(),
                )
                .await
        })
    }

    fn cancel(&self, request_key: &str) {
        self.cancel_request(request_key);
    }
}

fn validate_api_key(key: &str) -> TranslateResult<()> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(TranslateError::Validation("API key is empty".to_string()));
    }
    if trimmed.len() < MIN_KEY_LEN || trimmed.len() > MAX_KEY_LEN {
        return Err(TranslateError::Validation(format!(
            "API key length must be between {MIN_KEY_LEN} and {MAX_KEY_LEN} characters"
        )));
    }
    if key.chars().any(|ch| ch.is_whitespace()) {
        return Err(TranslateError::Validation(
            "API key must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

fn validate_base_url(base_url: &str, harden: bool) -> TranslateResult<()> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|err| TranslateError::Validation(format!("invalid base URL: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TranslateError::Validation(format!(
            "base URL scheme must be http or https, got '{}'",
            url.scheme()
        )));
    }
    if harden {
        let Some(host) = url.host_str() else {
            return Err(TranslateError::Validation(
                "base URL has no host".to_string(),
            ));
        };
        if is_private_host(host) {
            return Err(TranslateError::Validation(format!(
                "base URL host '{host}' is private and rejected in hardened mode"
            )));
        }
    }
    Ok(())
}

fn is_private_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return addr.is_private()
            || addr.is_loopback()
            || addr.is_link_local()
            || addr.is_unspecified();
    }
    if let Ok(addr) = host.trim_matches(['[', ']']).parse::<Ipv6Addr>() {
        // fc00::/7 covers unique-local addresses.
        return addr.is_loopback() || addr.is_unspecified() || (addr.segments()[0] & 0xfe00) == 0xfc00;
    }
    false
}

pub(crate) fn validate_locale(locale: &str) -> TranslateResult<()> {
    let (base, region) = match locale.split_once('-') {
        Some((base, region)) => (base, Some(region)),
        None => (locale, None),
    };
    let base_ok = (2..=3).contains(&base.len()) && base.chars().all(|ch| ch.is_ascii_lowercase());
    let region_ok = region
        .map(|region| {
            (2..=8).contains(&region.len()) && region.chars().all(|ch| ch.is_ascii_alphanumeric())
        })
        .unwrap_or(true);
    if base_ok && region_ok {
        Ok(())
    } else {
        Err(TranslateError::Validation(format!(
            "invalid locale code '{locale}'"
        )))
    }
}

fn sanitize_outgoing_text(text: &str) -> TranslateResult<String> {
    let cleaned: String = text.chars().filter(|ch| !ch.is_control()).collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return Err(TranslateError::Validation(
            "batch entry text is empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_TEXT_CHARS {
        return Err(TranslateError::Validation(format!(
            "batch entry text exceeds {MAX_TEXT_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn error_from_response(status: u16, body: &str) -> TranslateError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|body| body.code.clone());
    let quota = parsed.as_ref().and_then(|body| body.quota.clone());
    if status == 429 || is_quota_code(code.as_deref()) || quota.is_some() {
        return TranslateError::Quota {
            code,
            detail: quota,
        };
    }
    let message = parsed
        .and_then(|body| body.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                "no response body".to_string()
            } else {
                body.trim().to_string()
            }
        });
    TranslateError::Api { status, message }
}

fn is_quota_code(code: Option<&str>) -> bool {
    let Some(code) = code else {
        return false;
    };
    let lower = code.to_lowercase();
    lower.contains("quota") || lower.contains("rate_limit") || lower.contains("resource_exhausted")
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    success: bool,
    #[serde(default)]
    translations: HashMap<String, String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    code: Option<String>,
    quota: Option<QuotaDetail>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sk-test-0123456789abcdef";

    fn client() -> ApiClient {
        ApiClient::new(ApiConfig::new("https://api.example.com", KEY)).unwrap()
    }

    #[test]
    fn rejects_malformed_keys() {
        for bad in ["", "short", "has whitespace in the middle padding"] {
            let err = ApiClient::new(ApiConfig::new("https://api.example.com", bad)).unwrap_err();
            assert!(matches!(err, TranslateError::Validation(_)), "{bad:?}");
        }
    }

    #[test]
    fn rejects_malformed_urls() {
        for bad in ["not a url", "ftp://api.example.com", "file:///etc/passwd"] {
            let err = ApiClient::new(ApiConfig::new(bad, KEY)).unwrap_err();
            assert!(matches!(err, TranslateError::Validation(_)), "{bad:?}");
        }
    }

    #[test]
    fn hardened_mode_rejects_private_hosts() {
        for bad in [
            "http://localhost:8080",
            "http://127.0.0.1",
            "http://10.0.0.4",
            "http://192.168.1.1",
        ] {
            let mut config = ApiConfig::new(bad, KEY);
            config.harden = true;
            let err = ApiClient::new(config).unwrap_err();
            assert!(matches!(err, TranslateError::Validation(_)), "{bad:?}");
        }
        let mut config = ApiConfig::new("https://api.example.com", KEY);
        config.harden = true;
        assert!(ApiClient::new(config).is_ok());
    }

    #[test]
    fn locale_validation() {
        assert!(validate_locale("en").is_ok());
        assert!(validate_locale("es").is_ok());
        assert!(validate_locale("pt-BR").is_ok());
        assert!(validate_locale("zho").is_ok());
        assert!(validate_locale("EN").is_err());
        assert!(validate_locale("e").is_err());
        assert!(validate_locale("english").is_err());
        assert!(validate_locale("es_MX").is_err());
    }

    #[tokio::test]
    async fn batch_validation_runs_before_any_network_io() {
        let client = client();
        let err = client
            .translate_batch(Vec::new(), "en", "es", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::Validation(_)));

        let oversized = (0..=MAX_BATCH_ENTRIES)
            .map(|idx| BatchEntry::new(format!("e{idx}"), "Hello"))
            .collect();
        let err = client
            .translate_batch(oversized, "en", "es", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::Validation(_)));

        let err = client
            .translate_batch(vec![BatchEntry::new("e1", "Hello")], "en", "not-a!locale", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::Validation(_)));
    }

    #[test]
    fn rate_limiter_rejects_after_window_is_full() {
        let mut config = ApiConfig::new("https://api.example.com", KEY);
        config.max_requests_per_minute = 3;
        let client = ApiClient::new(config).unwrap();
        for _ in 0..3 {
            client.check_rate_limit().unwrap();
        }
        assert!(matches!(
            client.check_rate_limit().unwrap_err(),
            TranslateError::RateLimited
        ));
    }

    #[test]
    fn quota_responses_are_distinguished() {
        let err = error_from_response(429, "{}");
        assert!(err.is_quota_exceeded());

        let err = error_from_response(
            403,
            "{\"code\": \"quota_exceeded\", \"quota\": {\"limit\": 1000, \"used\": 1000, \"resetDate\": \"2026-09-01\"}}",
        );
        match err {
            TranslateError::Quota { code, detail } => {
                assert_eq!(code.as_deref(), Some("quota_exceeded"));
                let detail = detail.unwrap();
                assert_eq!(detail.limit, Some(1000));
                assert_eq!(detail.reset_date.as_deref(), Some("2026-09-01"));
            }
            other => panic!("expected quota error, got {other:?}"),
        }

        let err = error_from_response(500, "{\"error\": \"boom\"}");
        assert!(matches!(err, TranslateError::Api { status: 500, .. }));
    }

    #[test]
    fn outgoing_text_is_sanitized() {
        assert_eq!(
            sanitize_outgoing_text(" Hello\u{0000} world ").unwrap(),
            "Hello world"
        );
        assert!(sanitize_outgoing_text("\u{0007}").is_err());
    }

    #[test]
    fn correlation_ids_are_unique() {
        let client = client();
        let first = client.next_correlation_id();
        let second = client.next_correlation_id();
        assert_ne!(first, second);
        assert!(first.starts_with("req-"));
    }
}

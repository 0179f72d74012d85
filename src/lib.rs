use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod cache;
pub mod cleaner;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod hooks;
pub mod logging;
pub mod offline;
pub mod record;
pub mod settings;
mod test_util;

pub use api::{ApiClient, ApiConfig, BatchEntry, BatchRequest, TranslateBackend};
pub use cache::CacheStore;
pub use engine::{EngineOptions, TranslationEngine};
pub use error::{TranslateError, TranslateResult};
pub use extract::{ExtractOptions, ExtractionSummary};
pub use offline::OfflineManager;

#[derive(Debug, Clone)]
pub struct Config {
    pub src: String,
    pub output: String,
    pub source_lang: String,
    pub target_langs: String,
    pub settings_path: Option<String>,
    pub dry_run: bool,
}

pub async fn run(config: Config) -> Result<ExtractionSummary> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;

    let targets = parse_target_langs(&config.target_langs)?;
    api::validate_locale(&config.source_lang)
        .map_err(|err| anyhow!("invalid --source-lang: {}", err))?;
    for target in &targets {
        api::validate_locale(target).map_err(|err| anyhow!("invalid --target-langs: {}", err))?;
    }

    let mut options = extract::ExtractOptions::new(&config.src, &config.output);
    options.source_lang = config.source_lang;
    options.target_langs = targets;
    options.model = settings.model.clone();
    options.dry_run = config.dry_run;
    if !settings.include.is_empty() {
        options.include = settings.include.clone();
    }
    if !settings.exclude.is_empty() {
        options.exclude = settings.exclude.clone();
    }

    let backend: Arc<dyn TranslateBackend> = if config.dry_run {
        Arc::new(DryRunBackend)
    } else {
        let key = settings
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("no API key found (set RUSTLE_API_KEY or [api].key)"))?;
        let client = ApiClient::new(ApiConfig {
            base_url: settings.api_base_url.clone(),
            api_key: key,
            timeout_secs: settings.timeout_secs,
            max_requests_per_minute: settings.rate_limit_per_minute,
            harden: settings.harden,
        })
        .with_context(|| "failed to construct translation API client")?;
        Arc::new(client)
    };

    extract::run_extraction(backend, &options).await
}

/// Wires the runtime resolution stack from loaded settings: API client,
/// cache store (on disk when a cache dir is configured), offline manager,
/// and the engine options they feed. Everything is constructed once here and
/// passed by reference; there are no module-level singletons.
pub fn build_engine(settings: &settings::Settings, source_locale: &str) -> Result<TranslationEngine> {
    let key = settings
        .api_key
        .clone()
        .ok_or_else(|| anyhow!("no API key found (set RUSTLE_API_KEY or [api].key)"))?;
    let client = ApiClient::new(ApiConfig {
        base_url: settings.api_base_url.clone(),
        api_key: key,
        timeout_secs: settings.timeout_secs,
        max_requests_per_minute: settings.rate_limit_per_minute,
        harden: settings.harden,
    })
    .with_context(|| "failed to construct translation API client")?;

    let store = match &settings.cache_dir {
        Some(dir) => CacheStore::on_disk(&Path::new(dir).join("cache.json")),
        None => CacheStore::in_memory(),
    };

    let mut options = EngineOptions::default();
    options.source_locale = source_locale.to_string();
    options.max_retries = settings.max_retries;
    options.cache_max_age_ms = settings.cache_ttl_ms;
    options.debounce_ms = settings.debounce_ms;
    options.model = settings.model.clone();

    Ok(TranslationEngine::new(
        Arc::new(client),
        Arc::new(store),
        Arc::new(OfflineManager::new()),
        options,
    ))
}

struct DryRunBackend;

impl TranslateBackend for DryRunBackend {
    fn translate_batch(&self, _request: BatchRequest) -> api::BackendFuture {
        Box::pin(async {
            Err(TranslateError::Validation(
                "translation is disabled during a dry run".to_string(),
            ))
        })
    }
}

fn parse_target_langs(raw: &str) -> Result<Vec<String>> {
    let targets: Vec<String> = raw
        .split(',')
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(anyhow!("no target languages given"));
    }
    Ok(targets)
}

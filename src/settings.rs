use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub rate_limit_per_minute: usize,
    pub harden: bool,
    pub max_retries: u32,
    pub debounce_ms: u64,
    pub cache_ttl_ms: u64,
    pub cache_dir: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.rustle.dev".to_string(),
            api_key: None,
            model: None,
            timeout_secs: 30,
            rate_limit_per_minute: 60,
            harden: false,
            max_retries: 3,
            debounce_ms: 100,
            cache_ttl_ms: 7 * 24 * 3_600_000,
            cache_dir: None,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    api: Option<ApiSettings>,
    engine: Option<EngineSettings>,
    extract: Option<ExtractSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSettings {
    base_url: Option<String>,
    key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    rate_limit_per_minute: Option<usize>,
    harden: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSettings {
    max_retries: Option<u32>,
    debounce_ms: Option<u64>,
    cache_ttl_ms: Option<u64>,
    cache_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractSettings {
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("rustle.toml"));
    ordered_paths.push(PathBuf::from("rustle.local.toml"));

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    let mut settings = load_settings_from(&ordered_paths)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_settings_from(ordered_paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }
    Ok(settings)
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Some(url) = get_env("RUSTLE_API_URL") {
        settings.api_base_url = url;
    }
    if let Some(key) = get_env("RUSTLE_API_KEY") {
        settings.api_key = Some(key);
    }
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(api) = incoming.api {
            if let Some(url) = api.base_url {
                if !url.trim().is_empty() {
                    self.api_base_url = url;
                }
            }
            if let Some(key) = api.key {
                if !key.trim().is_empty() {
                    self.api_key = Some(key);
                }
            }
            if let Some(model) = api.model {
                if !model.trim().is_empty() {
                    self.model = Some(model);
                }
            }
            if let Some(timeout) = api.timeout_secs {
                if timeout > 0 {
                    self.timeout_secs = timeout;
                }
            }
            if let Some(limit) = api.rate_limit_per_minute {
                if limit > 0 {
                    self.rate_limit_per_minute = limit;
                }
            }
            if let Some(harden) = api.harden {
                self.harden = harden;
            }
        }
        if let Some(engine) = incoming.engine {
            if let Some(retries) = engine.max_retries {
                self.max_retries = retries;
            }
            if let Some(debounce) = engine.debounce_ms {
                self.debounce_ms = debounce;
            }
            if let Some(ttl) = engine.cache_ttl_ms {
                if ttl > 0 {
                    self.cache_ttl_ms = ttl;
                }
            }
            if let Some(dir) = engine.cache_dir {
                if !dir.trim().is_empty() {
                    self.cache_dir = Some(dir);
                }
            }
        }
        if let Some(extract) = incoming.extract {
            if let Some(include) = extract.include {
                self.include = include;
            }
            if let Some(exclude) = extract.exclude {
                self.exclude = exclude;
            }
        }
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

//! Master record and locale file persistence.
//!
//! The master record is the canonical inventory of every translatable
//! fragment ever extracted. It is written only by the extractor and read-only
//! everywhere else; locale files are flat derived artifacts regenerated from
//! it on every run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const MASTER_SCHEMA_VERSION: u32 = 1;
pub const MASTER_FILE_NAME: &str = "master.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    New,
    Translated,
    Updated,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationEntry {
    pub fingerprint: String,
    pub source: String,
    pub file: String,
    pub start: usize,
    pub end: usize,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    pub version: u32,
    #[serde(default)]
    pub translations: HashMap<String, String>,
    #[serde(rename = "lastTranslated")]
    pub last_translated: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterMetadata {
    pub version: u32,
    #[serde(rename = "sourceLanguage")]
    pub source_language: String,
    #[serde(rename = "targetLanguages")]
    pub target_languages: Vec<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
    #[serde(rename = "totalEntries")]
    pub total_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterRecord {
    pub metadata: MasterMetadata,
    #[serde(default)]
    pub entries: HashMap<String, TranslationEntry>,
}

impl MasterRecord {
    pub fn empty(source_language: &str, target_languages: &[String]) -> Self {
        Self {
            metadata: MasterMetadata {
                version: MASTER_SCHEMA_VERSION,
                source_language: source_language.to_string(),
                target_languages: target_languages.to_vec(),
                last_updated: rfc3339_now(),
                total_entries: 0,
            },
            entries: HashMap::new(),
        }
    }

    pub fn refresh_metadata(&mut self, source_language: &str, target_languages: &[String]) {
        self.metadata.version = MASTER_SCHEMA_VERSION;
        self.metadata.source_language = source_language.to_string();
        self.metadata.target_languages = target_languages.to_vec();
        self.metadata.last_updated = rfc3339_now();
        self.metadata.total_entries = self.entries.len();
    }
}

/// Loads the prior master record. A missing or unreadable file starts the
/// run from an empty record; extraction must never fail because the previous
/// output was corrupted.
pub fn load_master(path: &Path, source_language: &str, target_languages: &[String]) -> MasterRecord {
    if !path.exists() {
        return MasterRecord::empty(source_language, target_languages);
    }
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    "master record at {} is corrupt, starting empty: {}",
                    path.display(),
                    err
                );
                MasterRecord::empty(source_language, target_languages)
            }
        },
        Err(err) => {
            tracing::warn!(
                "master record at {} is unreadable, starting empty: {}",
                path.display(),
                err
            );
            MasterRecord::empty(source_language, target_languages)
        }
    }
}

pub fn save_master(path: &Path, record: &MasterRecord) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory: {}", dir.display()))?;
    }
    let content = serde_json::to_string_pretty(record)?;
    fs::write(path, content)
        .with_context(|| format!("failed to write master record: {}", path.display()))?;
    Ok(())
}

pub fn write_locale_file(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory: {}", dir.display()))?;
    }
    let content = serde_json::to_string_pretty(data)?;
    fs::write(path, content)
        .with_context(|| format!("failed to write locale file: {}", path.display()))?;
    Ok(())
}

pub fn read_locale_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read locale file: {}", path.display()))?;
    let data = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse locale file: {}", path.display()))?;
    Ok(data)
}

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn rfc3339_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| now_unix().to_string())
}

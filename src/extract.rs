//! Build-time extraction of translatable text.
//!
//! The scanner is a best-effort textual pass over markup-like sources: text
//! between tags, translatable attribute values, and quoted literals inside
//! braces. It deliberately does not parse an AST; the shared
//! `is_translatable_text` predicate filters the noise a pattern scan drags in.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::{BatchEntry, BatchRequest, MAX_BATCH_ENTRIES, TranslateBackend};
use crate::cleaner;
use crate::fingerprint::{content_hash, fingerprint, is_translatable_text};
use crate::record::{
    EntryStatus, MASTER_FILE_NAME, MasterRecord, TranslationEntry, load_master, now_unix,
    save_master, write_locale_file,
};

const CONTEXT_WINDOW: usize = 100;
const MAX_CONTEXT_TAGS: usize = 3;

const TRANSLATABLE_ATTRS: &[&str] = &["title", "alt", "placeholder", "aria-label", "aria-description"];

// Structural and framework tags carry no translation context.
const CONTEXT_TAG_DENYLIST: &[&str] = &[
    "div", "span", "html", "head", "body", "main", "section", "article", "script", "style",
    "link", "meta", "template", "fragment", "br", "hr",
];

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub src_dir: PathBuf,
    pub output_dir: PathBuf,
    pub source_lang: String,
    pub target_langs: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub model: Option<String>,
    pub dry_run: bool,
}

impl ExtractOptions {
    pub fn new(src_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            src_dir: src_dir.into(),
            output_dir: output_dir.into(),
            source_lang: "en".to_string(),
            target_langs: vec![
                "es".to_string(),
                "fr".to_string(),
                "de".to_string(),
                "it".to_string(),
                "pt".to_string(),
            ],
            include: vec![
                "**/*.html".to_string(),
                "**/*.htm".to_string(),
                "**/*.jsx".to_string(),
                "**/*.tsx".to_string(),
                "**/*.js".to_string(),
                "**/*.ts".to_string(),
                "**/*.vue".to_string(),
                "**/*.svelte".to_string(),
            ],
            exclude: vec![
                "**/node_modules/**".to_string(),
                "**/.next/**".to_string(),
                "**/dist/**".to_string(),
                "**/build/**".to_string(),
            ],
            model: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files_scanned: usize,
    pub new_entries: usize,
    pub updated_entries: usize,
    pub unchanged_entries: usize,
    pub locales_written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub tags: Vec<String>,
}

pub async fn run_extraction(
    backend: Arc<dyn TranslateBackend>,
    options: &ExtractOptions,
) -> Result<ExtractionSummary> {
    let master_path = options.output_dir.join(MASTER_FILE_NAME);
    let prior = load_master(&master_path, &options.source_lang, &options.target_langs);
    let mut record = MasterRecord {
        metadata: prior.metadata.clone(),
        entries: prior.entries.clone(),
    };
    let mut summary = ExtractionSummary::default();

    let files = enumerate_files(options)?;
    tracing::info!("scanning {} source files", files.len());

    for path in &files {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("skipping unreadable file {}: {}", path.display(), err);
                continue;
            }
        };
        summary.files_scanned += 1;
        let rel = relative_path(&options.src_dir, path);
        for candidate in scan_source(&content) {
            merge_candidate(
                &mut record,
                &prior,
                &rel,
                candidate,
                &options.target_langs,
                &mut summary,
            );
        }
    }

    record.refresh_metadata(&options.source_lang, &options.target_langs);
    save_master(&master_path, &record)?;
    tracing::info!(
        "master record written: {} entries ({} new, {} updated)",
        record.entries.len(),
        summary.new_entries,
        summary.updated_entries
    );

    // Source-language locale file: fingerprint -> source text, every entry.
    let source_map: HashMap<String, String> = record
        .entries
        .values()
        .map(|entry| (entry.fingerprint.clone(), entry.source.clone()))
        .collect();
    write_locale_file(
        &options.output_dir.join(format!("{}.json", options.source_lang)),
        &source_map,
    )?;
    summary.locales_written += 1;

    if options.dry_run {
        tracing::info!("dry run: skipping translation of target languages");
        return Ok(summary);
    }

    for lang in &options.target_langs {
        translate_language(backend.clone(), &mut record, lang, options).await;
        let locale_map: HashMap<String, String> = record
            .entries
            .values()
            .map(|entry| {
                let value = entry
                    .translations
                    .get(lang)
                    .cloned()
                    .unwrap_or_else(|| entry.source.clone());
                (entry.fingerprint.clone(), value)
            })
            .collect();
        write_locale_file(&options.output_dir.join(format!("{lang}.json")), &locale_map)?;
        summary.locales_written += 1;
    }

    record.refresh_metadata(&options.source_lang, &options.target_langs);
    save_master(&master_path, &record)?;
    Ok(summary)
}

/// Translates every entry missing `lang`, one batch call per language. A
/// failed batch leaves the entries untranslated; the caller writes source
/// text for them so the locale file never has missing keys.
async fn translate_language(
    backend: Arc<dyn TranslateBackend>,
    record: &mut MasterRecord,
    lang: &str,
    options: &ExtractOptions,
) {
    let missing: Vec<(String, String, Vec<String>, String)> = record
        .entries
        .values()
        .filter(|entry| !entry.translations.contains_key(lang))
        .map(|entry| {
            (
                entry.fingerprint.clone(),
                entry.source.clone(),
                entry.tags.clone(),
                entry.file.clone(),
            )
        })
        .collect();
    if missing.is_empty() {
        tracing::info!("{}: all entries already translated", lang);
        return;
    }
    tracing::info!("{}: translating {} entries", lang, missing.len());

    for chunk in missing.chunks(MAX_BATCH_ENTRIES) {
        let entries: Vec<BatchEntry> = chunk
            .iter()
            .map(|(id, text, tags, file)| {
                let mut entry = BatchEntry::new(id.clone(), text.clone());
                entry.tags = tags.clone();
                entry.file = Some(file.clone());
                entry
            })
            .collect();
        let request = BatchRequest {
            entries,
            source: options.source_lang.clone(),
            target: lang.to_string(),
            model: options.model.clone(),
            request_key: None,
        };
        match backend.translate_batch(request).await {
            Ok(translations) => {
                let now = now_unix();
                for (id, _, _, _) in chunk {
                    let Some(value) = translations.get(id) else {
                        continue;
                    };
                    if let Some(entry) = record.entries.get_mut(id) {
                        entry
                            .translations
                            .insert(lang.to_string(), cleaner::clean(value));
                        entry.last_translated = Some(now);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    "{}: batch translation failed, falling back to source text: {}",
                    lang,
                    err
                );
                mark_missing(record);
                return;
            }
        }
    }
}

// An entry that has been through translation before and still carries no
// translation at all is flagged so later runs retry it first.
fn mark_missing(record: &mut MasterRecord) {
    for entry in record.entries.values_mut() {
        if entry.translations.is_empty() && !matches!(entry.status, EntryStatus::New) {
            entry.status = EntryStatus::Missing;
        }
    }
}

fn merge_candidate(
    record: &mut MasterRecord,
    prior: &MasterRecord,
    file: &str,
    candidate: Candidate,
    target_langs: &[String],
    summary: &mut ExtractionSummary,
) {
    let fp = fingerprint(&candidate.text);
    let hash = content_hash(&candidate.text);

    if let Some(previous) = prior.entries.get(&fp) {
        if previous.content_hash == hash {
            // Same content: carry the prior entry over, upgrading entries
            // whose translations completed since they were created.
            summary.unchanged_entries += 1;
            let mut carried = previous.clone();
            if matches!(carried.status, EntryStatus::New | EntryStatus::Updated)
                && target_langs
                    .iter()
                    .all(|lang| carried.translations.contains_key(lang))
            {
                carried.status = EntryStatus::Translated;
            }
            record.entries.insert(fp, carried);
            return;
        }
    }

    if record.entries.contains_key(&fp) {
        // Already collected this run (same text in another location).
        return;
    }

    // A fragment edited in place keeps its history: find the prior entry at
    // the same source location and inherit its translations and version.
    if let Some(previous) = prior
        .entries
        .values()
        .find(|entry| entry.file == file && ranges_overlap(entry.start, entry.end, candidate.start, candidate.end))
        .filter(|entry| entry.content_hash != hash)
    {
        summary.updated_entries += 1;
        record.entries.insert(
            fp.clone(),
            TranslationEntry {
                fingerprint: fp,
                source: candidate.text,
                file: file.to_string(),
                start: candidate.start,
                end: candidate.end,
                content_hash: hash,
                version: previous.version + 1,
                translations: previous.translations.clone(),
                last_translated: previous.last_translated,
                tags: candidate.tags,
                status: EntryStatus::Updated,
            },
        );
        return;
    }

    summary.new_entries += 1;
    record.entries.insert(
        fp.clone(),
        TranslationEntry {
            fingerprint: fp,
            source: candidate.text,
            file: file.to_string(),
            start: candidate.start,
            end: candidate.end,
            content_hash: hash,
            version: 1,
            translations: HashMap::new(),
            last_translated: None,
            tags: candidate.tags,
            status: EntryStatus::New,
        },
    );
}

fn ranges_overlap(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

pub fn scan_source(content: &str) -> Vec<Candidate> {
    let mut seen = HashMap::new();
    let mut out = Vec::new();
    let mut raw = Vec::new();
    scan_tag_text(content, &mut raw);
    scan_attributes(content, &mut raw);
    scan_brace_literals(content, &mut raw);

    for (text, start, end) in raw {
        let trimmed = text.trim();
        // Spans still carrying braces are expression slots, not prose; the
        // quoted literals inside them are captured separately.
        if trimmed.contains('{') || trimmed.contains('}') {
            continue;
        }
        if !is_translatable_text(trimmed) {
            continue;
        }
        let fp = fingerprint(trimmed);
        if seen.contains_key(&fp) {
            continue;
        }
        seen.insert(fp, ());
        out.push(Candidate {
            text: trimmed.to_string(),
            start,
            end,
            tags: context_tags(content, start, end),
        });
    }
    out.sort_by_key(|candidate| candidate.start);
    out
}

fn scan_tag_text(content: &str, out: &mut Vec<(String, usize, usize)>) {
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'>' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let Some(offset) = content[start..].find('<') else {
            break;
        };
        let end = start + offset;
        out.push((content[start..end].to_string(), start, end));
        i = end;
    }
}

fn scan_attributes(content: &str, out: &mut Vec<(String, usize, usize)>) {
    for attr in TRANSLATABLE_ATTRS {
        for quote in ['"', '\''] {
            let needle = format!("{attr}={quote}");
            let mut from = 0;
            while let Some(found) = content[from..].find(&needle) {
                let start = from + found + needle.len();
                let Some(len) = content[start..].find(quote) else {
                    break;
                };
                let end = start + len;
                out.push((content[start..end].to_string(), start, end));
                from = end + 1;
            }
        }
    }
}

// JSX-style quoted literals inside braces: {'...'}, {"..."} and {`...`}.
fn scan_brace_literals(content: &str, out: &mut Vec<(String, usize, usize)>) {
    for quote in ['\'', '"', '`'] {
        let needle = format!("{{{quote}");
        let mut from = 0;
        while let Some(found) = content[from..].find(&needle) {
            let start = from + found + needle.len();
            let Some(len) = content[start..].find(quote) else {
                break;
            };
            let end = start + len;
            if content[end..].len() > 1 && content.as_bytes().get(end + 1) == Some(&b'}') {
                out.push((content[start..end].to_string(), start, end));
            }
            from = end + 1;
        }
    }
}

/// Contextual hint for translators: enclosing tag names within ±100 chars of
/// the match, minus structural tags, capped at three.
fn context_tags(content: &str, start: usize, end: usize) -> Vec<String> {
    let window_start = floor_char_boundary(content, start.saturating_sub(CONTEXT_WINDOW));
    let window_end = ceil_char_boundary(content, (end + CONTEXT_WINDOW).min(content.len()));
    let window = &content[window_start..window_end];

    let mut tags = Vec::new();
    let bytes = window.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'<' && bytes[i + 1].is_ascii_alphabetic() {
            let mut j = i + 1;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'-') {
                j += 1;
            }
            let name = window[i + 1..j].to_lowercase();
            if !CONTEXT_TAG_DENYLIST.contains(&name.as_str()) && !tags.contains(&name) {
                tags.push(name);
                if tags.len() == MAX_CONTEXT_TAGS {
                    break;
                }
            }
            i = j;
        } else {
            i += 1;
        }
    }
    tags
}

fn floor_char_boundary(content: &str, mut idx: usize) -> usize {
    while idx > 0 && !content.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(content: &str, mut idx: usize) -> usize {
    while idx < content.len() && !content.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn enumerate_files(options: &ExtractOptions) -> Result<Vec<PathBuf>> {
    let include = build_glob_set(&options.include)?;
    let exclude = build_glob_set(&options.exclude)?;
    let mut files = Vec::new();
    collect_files(&options.src_dir, &mut files)
        .with_context(|| format!("failed to walk source dir: {}", options.src_dir.display()))?;

    files.retain(|path| {
        let rel = relative_path(&options.src_dir, path);
        include.is_match(&rel) && !exclude.is_match(&rel)
    });
    files.sort();
    Ok(files)
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .with_context(|| format!("invalid glob pattern '{pattern}'"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

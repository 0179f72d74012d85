//! Cleanup of raw translation-service output.
//!
//! Models wrap their answers in quotes, markdown, "Translation:" prefixes, or
//! JSON-shaped strings. `clean` applies ordered passes that are each
//! idempotent, so re-cleaning an already clean string is a no-op.

use std::collections::HashMap;

use kuchiki::traits::*;

const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('\u{201C}', '\u{201D}'),
    ('\u{2018}', '\u{2019}'),
    ('\u{00AB}', '\u{00BB}'),
    ('\u{201E}', '\u{201C}'),
];

const QUOTE_CHARS: &[char] = &[
    '"', '\'', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}', '\u{00AB}', '\u{00BB}', '\u{201E}',
];

const TRANSLATION_PREFIXES: &[&str] = &[
    "translation:",
    "translated text:",
    "traducción:",
    "traduccion:",
    "traduction:",
    "übersetzung:",
    "ubersetzung:",
    "traduzione:",
    "tradução:",
    "traducao:",
    "翻译：",
    "翻译:",
    "翻訳：",
    "翻訳:",
];

const AI_PREAMBLES: &[&str] = &[
    "here is the translation:",
    "here's the translation:",
    "here is the translated text:",
    "the translation is:",
    "sure, here is the translation:",
    "aquí está la traducción:",
    "aqui está la traducción:",
    "voici la traduction:",
    "hier ist die übersetzung:",
    "ecco la traduzione:",
    "aqui está a tradução:",
];

pub fn clean(raw: &str) -> String {
    let mut value = raw.trim().to_string();
    value = strip_matching_quote_pairs(&value);
    value = strip_edge_quotes(&value);
    value = strip_translation_prefix(&value);
    value = strip_ai_preamble(&value);
    value = strip_markdown_wrapper(&value);
    value = unwrap_json_shape(&value);
    value = collapse_whitespace(&value);
    value = strip_guarded_quote_pair(&value);
    value.trim().to_string()
}

pub fn clean_batch(values: &HashMap<String, String>) -> HashMap<String, String> {
    values
        .iter()
        .map(|(key, value)| (key.clone(), clean(value)))
        .collect()
}

fn strip_matching_quote_pairs(value: &str) -> String {
    let mut current = value.trim().to_string();
    loop {
        let Some(stripped) = strip_one_quote_pair(&current) else {
            return current;
        };
        current = stripped.trim().to_string();
    }
}

fn strip_one_quote_pair(value: &str) -> Option<String> {
    let mut chars = value.chars();
    let first = chars.next()?;
    let last = value.chars().next_back()?;
    if value.chars().count() < 2 {
        return None;
    }
    for (open, close) in QUOTE_PAIRS {
        if first == *open && last == *close {
            let inner = &value[first.len_utf8()..value.len() - last.len_utf8()];
            return Some(inner.to_string());
        }
    }
    None
}

fn strip_edge_quotes(value: &str) -> String {
    value.trim_matches(|ch| QUOTE_CHARS.contains(&ch)).to_string()
}

fn strip_translation_prefix(value: &str) -> String {
    let trimmed = value.trim();
    let lower = trimmed.to_lowercase();
    for prefix in TRANSLATION_PREFIXES {
        if lower.starts_with(prefix) {
            return trimmed[byte_len_of_prefix(trimmed, prefix)..].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn strip_ai_preamble(value: &str) -> String {
    let trimmed = value.trim();
    let lower = trimmed.to_lowercase();
    for preamble in AI_PREAMBLES {
        if lower.starts_with(preamble) {
            return trimmed[byte_len_of_prefix(trimmed, preamble)..]
                .trim()
                .to_string();
        }
    }
    trimmed.to_string()
}

// The lowercased needle may differ in byte length from the original prefix
// (e.g. İ), so re-measure against the original string.
fn byte_len_of_prefix(original: &str, lower_prefix: &str) -> usize {
    let prefix_chars = lower_prefix.chars().count();
    original
        .char_indices()
        .nth(prefix_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(original.len())
}

fn strip_markdown_wrapper(value: &str) -> String {
    let trimmed = value.trim();
    for marker in ["```", "**", "__", "*", "_", "`"] {
        if trimmed.len() > marker.len() * 2
            && trimmed.starts_with(marker)
            && trimmed.ends_with(marker)
        {
            let inner = &trimmed[marker.len()..trimmed.len() - marker.len()];
            if !inner.contains(marker) {
                return inner.trim().to_string();
            }
        }
    }
    trimmed.to_string()
}

fn unwrap_json_shape(value: &str) -> String {
    let trimmed = value.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return trimmed.to_string();
    }
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return trimmed.to_string();
    };
    for field in ["text", "translation"] {
        if let Some(inner) = parsed.get(field).and_then(|value| value.as_str()) {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

fn collapse_whitespace(value: &str) -> String {
    let mut out = String::new();
    let mut last_space = false;
    for ch in value.trim().chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

// Final defensive pass: only strips an outer pair when the quote character
// does not also appear inside, so legitimately quoted content survives.
fn strip_guarded_quote_pair(value: &str) -> String {
    let Some(inner) = strip_one_quote_pair(value) else {
        return value.to_string();
    };
    let first = value.chars().next().unwrap_or('"');
    if inner.contains(first) {
        return value.to_string();
    }
    inner.trim().to_string()
}

const BLOCKED_ELEMENTS: &[&str] = &["script", "iframe", "object", "embed"];
const URL_ATTRS: &[&str] = &["href", "src", "action", "formaction"];

/// Defense-in-depth scrub applied before cleaned text is ever injected as
/// raw HTML: drops active-content elements, inline event handlers, and
/// scriptable URL schemes.
pub fn sanitize_html(html: &str) -> String {
    let document = kuchiki::parse_html().one(html);

    let doomed: Vec<kuchiki::NodeRef> = document
        .descendants()
        .filter(|node| {
            node.as_element()
                .map(|element| BLOCKED_ELEMENTS.contains(&element.name.local.as_ref()))
                .unwrap_or(false)
        })
        .collect();
    for node in doomed {
        node.detach();
    }

    for node in document.descendants() {
        let Some(element) = node.as_element() else {
            continue;
        };
        let mut attrs = element.attributes.borrow_mut();
        attrs.map.retain(|name, _| !name.local.starts_with("on"));
        for attr in URL_ATTRS {
            let Some(value) = attrs.get(*attr).map(|value| value.trim().to_lowercase()) else {
                continue;
            };
            if value.starts_with("javascript:")
                || (value.starts_with("data:") && !value.starts_with("data:image/"))
            {
                attrs.remove(*attr);
            }
        }
    }

    if html.to_lowercase().contains("<html") {
        return document.to_string();
    }
    let Ok(body) = document.select_first("body") else {
        return document.to_string();
    };
    body.as_node()
        .children()
        .map(|child| child.to_string())
        .collect::<String>()
}

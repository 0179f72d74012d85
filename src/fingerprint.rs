//! Stable content identifiers for translatable text fragments.
//!
//! The extractor and the runtime resolver must derive identical fingerprints
//! for identical text, so normalization and hashing live here and nowhere
//! else.

const FINGERPRINT_LEN: usize = 12;
const MIN_TRANSLATABLE_CHARS: usize = 2;

pub fn normalize(text: &str) -> String {
    let mut out = String::new();
    let mut last_space = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        }
    }
    out
}

/// Short stable identifier for a text fragment. Collision-tolerant: the
/// codomain is 48 bits, which is accepted for lookup keys.
pub fn fingerprint(text: &str) -> String {
    let digest = format!("{:x}", md5::compute(normalize(text).as_bytes()));
    digest[..FINGERPRINT_LEN].to_string()
}

/// Full-width hash of the normalized text, used to detect that a fragment's
/// source changed between extractions.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", md5::compute(normalize(text).as_bytes()))
}

/// Gate applied to every extraction and runtime-scan candidate. The CLI and
/// the resolver share this exact predicate; diverging copies would make
/// build-time and run-time fingerprints drift apart.
pub fn is_translatable_text(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.chars().count() < MIN_TRANSLATABLE_CHARS {
        return false;
    }
    if is_punct_or_digits_only(trimmed) {
        return false;
    }
    if looks_like_url(trimmed) {
        return false;
    }
    if has_template_placeholder(trimmed) {
        return false;
    }
    if !trimmed.chars().any(|ch| ch.is_whitespace()) && looks_like_identifier(trimmed) {
        return false;
    }
    true
}

fn is_punct_or_digits_only(value: &str) -> bool {
    !value
        .chars()
        .any(|ch| ch.is_alphabetic() && !ch.is_whitespace())
}

fn looks_like_url(value: &str) -> bool {
    let lower = value.to_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("mailto:")
        || value.contains("://")
}

fn has_template_placeholder(value: &str) -> bool {
    value.contains("{{") || value.contains("}}") || value.contains("${")
}

fn looks_like_identifier(value: &str) -> bool {
    if !value.is_ascii() {
        return false;
    }
    if is_all_uppercase(value) {
        return true;
    }
    let has_special = value
        .chars()
        .any(|ch| matches!(ch, '_' | '-' | '/' | '.' | ':' | '@'));
    let has_digit = value.chars().any(|ch| ch.is_ascii_digit());
    let has_camel = value
        .chars()
        .zip(value.chars().skip(1))
        .any(|(prev, next)| prev.is_ascii_lowercase() && next.is_ascii_uppercase());
    let allowed = value.chars().all(|ch| {
        ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '/' | '.' | ':' | '@' | '$')
    });
    allowed && (has_special || has_digit || has_camel)
}

fn is_all_uppercase(value: &str) -> bool {
    let mut has_alpha = false;
    for ch in value.chars() {
        if ch.is_ascii_alphabetic() {
            has_alpha = true;
            if !ch.is_ascii_uppercase() {
                return false;
            }
        }
    }
    has_alpha
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint("Welcome"), fingerprint("Welcome"));
        assert_eq!(fingerprint("Welcome").len(), FINGERPRINT_LEN);
    }

    #[test]
    fn fingerprint_is_stable_under_whitespace_and_case() {
        assert_eq!(fingerprint("Hello   world"), fingerprint("Hello world"));
        assert_eq!(fingerprint("  Hello world  "), fingerprint("hello WORLD"));
        assert_ne!(fingerprint("Hello world"), fingerprint("Hello worlds"));
    }

    #[test]
    fn content_hash_shares_normalization() {
        assert_eq!(content_hash("Hello   world"), content_hash("hello world"));
        assert!(content_hash("Hello world").starts_with(&fingerprint("Hello world")));
    }

    #[test]
    fn accepts_ordinary_sentences() {
        assert!(is_translatable_text("Welcome to our site"));
        assert!(is_translatable_text("Hi"));
        assert!(is_translatable_text("¿Cómo estás?"));
    }

    #[test]
    fn rejects_empty_and_short_text() {
        assert!(!is_translatable_text(""));
        assert!(!is_translatable_text("   "));
        assert!(!is_translatable_text("a"));
    }

    #[test]
    fn rejects_punctuation_and_digits() {
        assert!(!is_translatable_text("1234"));
        assert!(!is_translatable_text("---"));
        assert!(!is_translatable_text("42%"));
    }

    #[test]
    fn rejects_identifier_like_tokens() {
        assert!(!is_translatable_text("API_KEY"));
        assert!(!is_translatable_text("userName2"));
        assert!(!is_translatable_text("some-css-class"));
        assert!(!is_translatable_text("camelCase"));
        assert!(is_translatable_text("Words"));
    }

    #[test]
    fn rejects_urls_and_placeholders() {
        assert!(!is_translatable_text("https://example.com/page"));
        assert!(!is_translatable_text("{{ count }} items"));
        assert!(!is_translatable_text("Hello ${name}"));
    }
}

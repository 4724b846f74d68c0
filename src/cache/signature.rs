// Diagnostic signatures
//
// A signature is a stable, hashable key for "this kind of problem in this
// kind of code". Two diagnostics that differ only in file path, line/column
// numbers, or quoted identifier spelling should collide, so the normalizer
// strips all three before hashing.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// How many characters of source to keep on each side of the diagnostic
/// range when building the context window.
pub const CONTEXT_RADIUS: usize = 240;

static PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:[A-Za-z]:)?[\w.\-]*[/\\][\w.\-/\\]+").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"['`"][^'`"]*['`"]"#).unwrap());

/// Normalize a diagnostic message: lowercase, paths reduced to their final
/// segment, numbers and quoted identifiers replaced with placeholders.
pub fn normalize_message(message: &str) -> String {
    let lower = message.to_lowercase();
    let no_paths = PATH_RE.replace_all(&lower, |caps: &regex::Captures| {
        let path = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        path.rsplit(['/', '\\'])
            .next()
            .unwrap_or("")
            .to_string()
    });
    let no_quotes = QUOTED_RE.replace_all(&no_paths, "'_'");
    let no_numbers = NUMBER_RE.replace_all(&no_quotes, "#");
    no_numbers.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Bounded window of source text around a character range.
pub fn context_window(content: &str, range: (u64, u64)) -> String {
    let chars: Vec<char> = content.chars().collect();
    let start = (range.0 as usize).min(chars.len());
    let end = (range.1 as usize).clamp(start, chars.len());
    let from = start.saturating_sub(CONTEXT_RADIUS);
    let to = (end + CONTEXT_RADIUS).min(chars.len());
    chars[from..to].iter().collect()
}

/// Deterministic cache key over (normalized message, context window,
/// language id). SHA-256 hex, the same hashing idiom the metrics logger
/// uses for file ids.
pub fn signature(message: &str, context: &str, language: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_message(message).as_bytes());
    hasher.update(b"\n");
    hasher.update(context.as_bytes());
    hasher.update(b"\n");
    hasher.update(language.as_bytes());
    format!("{:x}", hasher.finalize())
}

//! Source-text normalization and language detection.
//! Uploaded chapters are cleaned once on the way in; detection resolves the
//! `auto` language and flags chapters that do not match their novel.

use tracing::warn;

/// Language codes with a heuristic name detector.
pub const KOREAN: &str = "ko";
pub const JAPANESE: &str = "ja";
pub const AUTO: &str = "auto";

/// Detects the dominant language of `text` using whatlang.
/// Returns an ISO 639-1 code, or None if detection is unreliable or the
/// language is not one the pipeline knows.
pub fn detect_language(text: &str) -> Option<String> {
    let info = whatlang::detect(text)?;
    if !info.is_reliable() {
        return None;
    }
    lang_to_code(info.lang()).map(str::to_string)
}

fn lang_to_code(lang: whatlang::Lang) -> Option<&'static str> {
    use whatlang::Lang::*;
    match lang {
        Kor => Some(KOREAN),
        Jpn => Some(JAPANESE),
        Eng => Some("en"),
        Cmn => Some("zh"),
        _ => None,
    }
}

/// Resolve `auto` to a detected code; other codes pass through lowercased.
/// Undetectable text falls back to Korean.
pub fn resolve_language(language: &str, text: &str) -> String {
    let language = language.trim().to_lowercase();
    if language != AUTO {
        return language;
    }
    detect_language(text).unwrap_or_else(|| {
        warn!(fallback = KOREAN, "could not detect source language");
        KOREAN.to_string()
    })
}

/// The detected language of `text` when it reliably differs from the
/// declared one. Never reports for `auto`.
pub fn language_mismatch(declared: &str, text: &str) -> Option<String> {
    let declared = declared.trim().to_lowercase();
    if declared == AUTO {
        return None;
    }
    detect_language(text).filter(|detected| *detected != declared)
}

pub fn language_name(code: &str) -> &str {
    match code {
        KOREAN => "Korean",
        JAPANESE => "Japanese",
        "en" => "English",
        "zh" => "Chinese",
        other => other,
    }
}

/// Clean uploaded chapter text: drop a BOM, unify line endings, strip
/// trailing whitespace per line and surrounding blank lines.
pub fn normalize_source(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    lines.join("\n").trim_matches('\n').to_string()
}

/// First `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// A short window of `text` around the first occurrence of `needle`, on one
/// line, for showing a reviewer where a name appeared.
pub fn snippet_around(text: &str, needle: &str, radius_chars: usize) -> Option<String> {
    let start = text.find(needle)?;
    let before: String = {
        let mut chars: Vec<char> = text[..start].chars().rev().take(radius_chars).collect();
        chars.reverse();
        chars.into_iter().collect()
    };
    let after: String = text[start + needle.len()..].chars().take(radius_chars).collect();
    let snippet = format!("{before}{needle}{after}");
    Some(snippet.split_whitespace().collect::<Vec<_>>().join(" "))
}

//! Dictionary application: rewrite translated text so every known original
//! name becomes its canonical translation.
//!
//! Entries are applied longest original first so a short name that is a
//! substring of a longer one ("철수" inside "김철수") cannot break the longer
//! match. Names are literal text, never patterns. If a translated name equals
//! another entry's original name it will be substituted again; that case is
//! left as-is.

/// Apply `entries` (original, translated) to `text`.
pub fn apply_dictionary<'a, I>(text: &str, entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut sorted: Vec<(&str, &str)> = entries
        .into_iter()
        .filter(|(original, _)| !original.is_empty())
        .collect();
    sorted.sort_by(|a, b| {
        b.0.chars()
            .count()
            .cmp(&a.0.chars().count())
            .then_with(|| a.0.cmp(b.0))
    });

    let mut out = text.to_string();
    for (original, translated) in sorted {
        if out.contains(original) {
            out = out.replace(original, translated);
        }
    }
    out
}

//! Prompt construction for the three model tasks.

use super::normalize::language_name;
use crate::model::{NameMapping, TranslationContext};

/// Ask for proper nouns as a JSON array of
/// `{originalText, type, suggestedTranslation}`.
pub fn name_extraction(text: &str, language: &str) -> String {
    format!(
        "The following is text from a {lang} novel.\n\
         Identify every proper noun in it: character names, location names, organizations, \
         items and special terms.\n\
         Return ONLY a JSON array of objects with the fields \"originalText\" (exactly as written \
         in the text), \"type\" (one of character, location, organization, item, concept, other) \
         and \"suggestedTranslation\" (your best English rendering).\n\n\
         Example:\n\
         [\n  {{\"originalText\": \"김철수\", \"type\": \"character\", \"suggestedTranslation\": \"Kim Cheol-su\"}},\n  \
         {{\"originalText\": \"서울\", \"type\": \"location\", \"suggestedTranslation\": \"Seoul\"}}\n]\n\n\
         Text:\n{text}",
        lang = language_name(language),
    )
}

/// Render glossary lines as `original → translated`.
pub fn render_glossary(terms: &[NameMapping]) -> String {
    let mut out = String::new();
    for t in terms {
        out.push_str(&t.original_name);
        out.push_str(" → ");
        out.push_str(&t.translated_name);
        out.push('\n');
    }
    out
}

pub fn translation(
    source_text: &str,
    context: &TranslationContext,
    source_lang: &str,
    target_lang: &str,
) -> String {
    let mut out = String::from("<context>\n");
    if !context.summary.is_empty() {
        out.push_str("Previous chapters:\n");
        out.push_str(&context.summary);
        out.push_str("\n\n");
    }
    if !context.key_terms.is_empty() {
        out.push_str("Key terms and names used in previous chapters:\n");
        out.push_str(&render_glossary(&context.key_terms));
    }
    out.push_str("</context>\n\n");

    out.push_str(&format!(
        "You are translating a {} novel into {}.\n\
         Translate the following chapter naturally, keeping the original tone, style and meaning.\n\n\
         Guidelines:\n\
         1. Use the translations listed under key terms for every name they cover, consistently.\n\
         2. Leave any other character name exactly as it appears in the source text.\n\
         3. Keep honorifics (such as -san, -nim) in romanized form.\n\
         4. Keep cultural references; add a brief explanation in [square brackets] only when needed.\n\
         5. Preserve paragraph breaks.\n\
         6. Render dialogue the way a native speaker of the target language would say it.\n\
         7. Output only the translation.\n\n\
         Chapter to translate:\n",
        language_name(source_lang),
        language_name(target_lang),
    ));
    out.push_str(source_text);
    out
}

pub fn summary(translated_text: &str) -> String {
    format!(
        "The following is a translated chapter from a novel.\n\
         Write a concise summary (at most 200 words) of the key plot points, character \
         developments and important events. It will be given as context when translating later \
         chapters, so name characters and places explicitly.\n\n\
         Chapter:\n{translated_text}"
    )
}

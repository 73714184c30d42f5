//! Name detection: ask the model for proper nouns, fall back to heuristics
//! when that fails, and keep only names the dictionary does not know yet.
//! Detection never blocks translation; model and parse failures degrade to
//! the heuristic pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::detect::DetectorRegistry;
use super::glossary::NameDictionary;
use super::normalize::{resolve_language, snippet_around, truncate_chars};
use super::{complete_within, prompts, CompletionRequest, LanguageModel, Task};
use crate::config::{FallbackScope, PipelineConfig};
use crate::model::{NameCandidate, NameType};
use crate::store::{Store, StoreError};

const SNIPPET_RADIUS: usize = 20;

/// Extraction output that could not be used.
#[derive(Debug)]
enum ParseError {
    NoJsonArray,
    Json(serde_json::Error),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::NoJsonArray => write!(f, "no JSON array in model output"),
            ParseError::Json(e) => write!(f, "malformed name list: {e}"),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCandidate {
    #[serde(alias = "original", alias = "name")]
    original_text: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, alias = "translation")]
    suggested_translation: Option<String>,
}

pub struct NameDetectionService {
    store: Arc<Store>,
    model: Arc<dyn LanguageModel>,
    detectors: DetectorRegistry,
    config: PipelineConfig,
    call_timeout: Duration,
}

impl NameDetectionService {
    pub fn new(
        store: Arc<Store>,
        model: Arc<dyn LanguageModel>,
        config: PipelineConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            model,
            detectors: DetectorRegistry::default(),
            config,
            call_timeout,
        }
    }

    pub fn with_detectors(mut self, detectors: DetectorRegistry) -> Self {
        self.detectors = detectors;
        self
    }

    /// Candidate names in `text` that the novel's dictionary does not contain.
    /// Only a store failure is an error.
    pub async fn detect_names(
        &self,
        text: &str,
        novel_id: &str,
        language: &str,
    ) -> Result<Vec<NameCandidate>, StoreError> {
        let dictionary = NameDictionary::for_novel(Arc::clone(&self.store), novel_id)?;
        let language = resolve_language(language, text);
        let prefix = truncate_chars(text, self.config.detection_prefix_chars);

        let request =
            CompletionRequest::new(Task::ExtractNames, prompts::name_extraction(prefix, &language));
        let candidates = match complete_within(self.model.as_ref(), &request, self.call_timeout).await {
            Ok(reply) => match parse_candidates(&reply) {
                Ok(found) => {
                    debug!(novel_id, found = found.len(), "model name extraction parsed");
                    found
                }
                Err(e) => {
                    warn!(novel_id, error = %e, "name extraction unparseable, using heuristics");
                    self.fallback(text, prefix, &language)
                }
            },
            Err(e) => {
                warn!(novel_id, error = %e, "name extraction failed, using heuristics");
                self.fallback(text, prefix, &language)
            }
        };

        let new_names = filter_new(candidates, &dictionary, text);
        info!(novel_id, language = %language, new_names = new_names.len(), "names detected");
        Ok(new_names)
    }

    fn fallback(&self, text: &str, prefix: &str, language: &str) -> Vec<NameCandidate> {
        let scope = match self.config.fallback_scope {
            FallbackScope::FullText => text,
            FallbackScope::Prefix => prefix,
        };
        self.detectors.detect(language, scope)
    }
}

/// Trim, drop empties and repeats, drop known names, attach a context snippet.
fn filter_new(
    candidates: Vec<NameCandidate>,
    dictionary: &NameDictionary,
    text: &str,
) -> Vec<NameCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter_map(|mut c| {
            c.original_text = c.original_text.trim().to_string();
            if c.original_text.is_empty()
                || dictionary.contains(&c.original_text)
                || !seen.insert(c.original_text.clone())
            {
                return None;
            }
            if c.context.is_none() {
                c.context = snippet_around(text, &c.original_text, SNIPPET_RADIUS);
            }
            Some(c)
        })
        .collect()
}

/// The first balanced `[...]` in the reply that holds candidate objects.
/// Bracketed prose before the array is skipped.
fn parse_candidates(reply: &str) -> Result<Vec<NameCandidate>, ParseError> {
    let mut error = ParseError::NoJsonArray;
    for json in json_arrays(reply) {
        match serde_json::from_str::<Vec<RawCandidate>>(json) {
            Ok(raw) => return Ok(raw.into_iter().map(RawCandidate::into_candidate).collect()),
            Err(e) => error = ParseError::Json(e),
        }
    }
    Err(error)
}

impl RawCandidate {
    fn into_candidate(self) -> NameCandidate {
        NameCandidate {
            original_text: self.original_text,
            name_type: self
                .kind
                .as_deref()
                .map(NameType::parse_lenient)
                .unwrap_or(NameType::Unknown),
            suggested_translation: self.suggested_translation.unwrap_or_default().trim().to_string(),
            context: None,
        }
    }
}

/// Balanced `[...]` spans of `output`, one per opening bracket, in order.
fn json_arrays(output: &str) -> impl Iterator<Item = &str> {
    output
        .match_indices('[')
        .filter_map(|(start, _)| balanced_array(&output[start..]))
}

/// The balanced array `text` opens with, ignoring brackets inside JSON strings.
fn balanced_array(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::seeded;
    use crate::translate::testing::ScriptedModel;
    use crate::translate::LlmError;

    fn service(store: Store, model: ScriptedModel, config: PipelineConfig) -> (NameDetectionService, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let svc = NameDetectionService::new(
            Arc::new(store),
            Arc::clone(&model) as Arc<dyn LanguageModel>,
            config,
            Duration::from_secs(5),
        );
        (svc, model)
    }

    const REPLY: &str = r#"Sure! Here are the names:
```json
[
  {"originalText": "김철수", "type": "character", "suggestedTranslation": "Kim Cheol-su"},
  {"originalText": "서울", "type": "location", "suggestedTranslation": "Seoul"},
  {"originalText": "김철수", "type": "character", "suggestedTranslation": "Kim Cheol-su"}
]
```"#;

    #[test]
    fn test_balanced_array_ignores_brackets_in_strings() {
        let out = r#"[{"originalText": "a]b"}] trailing"#;
        assert_eq!(balanced_array(out), Some(r#"[{"originalText": "a]b"}]"#));
        assert_eq!(balanced_array("[[1], [2]] x"), Some("[[1], [2]]"));
        assert_eq!(balanced_array("[unclosed"), None);
        assert_eq!(json_arrays("no array").count(), 0);
    }

    #[test]
    fn test_bracketed_prose_before_array_is_skipped() {
        let reply = r#"Names [JSON]: [{"originalText": "김철수", "type": "character"}]"#;
        let parsed = parse_candidates(reply).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].original_text, "김철수");

        let reply = r#"note [see below]: [{"originalText": "a]b"}] trailing"#;
        assert_eq!(parse_candidates(reply).unwrap()[0].original_text, "a]b");
    }

    #[test]
    fn test_parse_candidates() {
        let parsed = parse_candidates(REPLY).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1].name_type, NameType::Location);
        assert_eq!(parsed[1].suggested_translation, "Seoul");
        assert!(parse_candidates("I found no names.").is_err());
        assert!(parse_candidates("[not json]").is_err());
        assert!(parse_candidates("[]").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_known_names_are_filtered_and_duplicates_dropped() {
        let (store, novel, _) = seeded();
        store
            .insert_name_mapping(&novel.id, "서울", "Seoul", NameType::Location, None)
            .unwrap();
        let (svc, _) = service(
            store,
            ScriptedModel::new().reply(Task::ExtractNames, REPLY),
            PipelineConfig::default(),
        );
        let found = svc
            .detect_names("김철수는 서울에 산다.", &novel.id, "ko")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].original_text, "김철수");
        assert_eq!(found[0].suggested_translation, "Kim Cheol-su");
        assert_eq!(found[0].context.as_deref(), Some("김철수는 서울에 산다."));
    }

    #[tokio::test]
    async fn test_malformed_output_falls_back_to_heuristics() {
        let (store, novel, _) = seeded();
        let (svc, _) = service(
            store,
            ScriptedModel::new().reply(Task::ExtractNames, "Names: 김철수, 서울 (sorry, no JSON)"),
            PipelineConfig::default(),
        );
        let found = svc
            .detect_names("그때 김철수씨가 웃었다", &novel.id, "ko")
            .await
            .unwrap();
        assert!(found.iter().any(|c| c.original_text == "김철수씨"));
        assert!(found.iter().all(|c| c.name_type == NameType::Unknown));
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_without_error() {
        let (store, novel, _) = seeded();
        let (svc, _) = service(
            store,
            ScriptedModel::new().fail(Task::ExtractNames, LlmError::Timeout),
            PipelineConfig::default(),
        );
        let found = svc
            .detect_names("no hangul here", &novel.id, "ko")
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_never_returns_known_names() {
        let (store, novel, _) = seeded();
        store
            .insert_name_mapping(&novel.id, "김철수씨", "Mr. Kim Chulsoo", NameType::Character, None)
            .unwrap();
        let (svc, _) = service(
            store,
            ScriptedModel::new().reply(Task::ExtractNames, "garbage"),
            PipelineConfig::default(),
        );
        let found = svc
            .detect_names("그때 김철수씨가 웃었다", &novel.id, "ko")
            .await
            .unwrap();
        assert!(found.iter().all(|c| c.original_text != "김철수씨"));
    }

    #[tokio::test]
    async fn test_model_sees_only_prefix_but_fallback_sees_all() {
        let (store, novel, _) = seeded();
        let config = PipelineConfig {
            detection_prefix_chars: 5,
            ..PipelineConfig::default()
        };
        let (svc, model) = service(store, ScriptedModel::new().reply(Task::ExtractNames, "??"), config);
        let text = "가나다라마 바사아 이민준씨가 왔다";
        let found = svc.detect_names(text, &novel.id, "ko").await.unwrap();

        let prompts = model.prompts_for(Task::ExtractNames);
        assert!(prompts[0].ends_with("가나다라마"));
        assert!(found.iter().any(|c| c.original_text.contains("민준씨")));
    }

    #[tokio::test]
    async fn test_prefix_scope_limits_fallback() {
        let (store, novel, _) = seeded();
        let config = PipelineConfig {
            detection_prefix_chars: 5,
            fallback_scope: FallbackScope::Prefix,
            ..PipelineConfig::default()
        };
        let (svc, _) = service(store, ScriptedModel::new().reply(Task::ExtractNames, "??"), config);
        let found = svc
            .detect_names("가나다라마 바사아 이민준씨가 왔다", &novel.id, "ko")
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}

//! Chapter translation pipeline.
//!
//! One run: assemble context, detect new names, translate, enforce the
//! dictionary on the output, persist, then summarize for later chapters.
//! A failed translation call writes nothing. A failed summary is only logged.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::context::ContextAssembler;
use super::glossary::NameDictionary;
use super::names::NameDetectionService;
use super::normalize::{language_mismatch, resolve_language, truncate_chars};
use super::{complete_within, prompts, CompletionRequest, LanguageModel, LlmError, Task};
use crate::config::PipelineConfig;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::model::{Chapter, ChapterTranslationResult, Novel};
use crate::state_machine::{ChapterStatus, InvalidTransition};
use crate::store::{Store, StoreError};

#[derive(Debug)]
pub enum PipelineError {
    NovelNotFound(String),
    ChapterNotFound(String),
    ChapterMismatch { chapter_id: String, novel_id: String },
    /// The translation call failed; nothing was written.
    TranslationFailure(LlmError),
    InvalidTransition(InvalidTransition),
    /// The chapter still has detected names awaiting review.
    PendingNames(usize),
    Store(StoreError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::NovelNotFound(id) => write!(f, "novel not found: {id}"),
            PipelineError::ChapterNotFound(id) => write!(f, "chapter not found: {id}"),
            PipelineError::ChapterMismatch { chapter_id, novel_id } => {
                write!(f, "chapter {chapter_id} does not belong to novel {novel_id}")
            }
            PipelineError::TranslationFailure(e) => write!(f, "translation failed: {e}"),
            PipelineError::InvalidTransition(e) => write!(f, "{e}"),
            PipelineError::PendingNames(n) => {
                write!(f, "{n} detected name(s) still awaiting review")
            }
            PipelineError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::TranslationFailure(e) => Some(e),
            PipelineError::InvalidTransition(e) => Some(e),
            PipelineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::Store(e)
    }
}

impl From<InvalidTransition> for PipelineError {
    fn from(e: InvalidTransition) -> Self {
        PipelineError::InvalidTransition(e)
    }
}

/// Look up a novel and one of its chapters.
pub(crate) fn novel_and_chapter(
    store: &Store,
    novel_id: &str,
    chapter_id: &str,
) -> Result<(Novel, Chapter), PipelineError> {
    let novel = store
        .novel(novel_id)?
        .ok_or_else(|| PipelineError::NovelNotFound(novel_id.to_string()))?;
    let chapter = store
        .chapter(chapter_id)?
        .ok_or_else(|| PipelineError::ChapterNotFound(chapter_id.to_string()))?;
    if chapter.novel_id != novel.id {
        return Err(PipelineError::ChapterMismatch {
            chapter_id: chapter.id,
            novel_id: novel.id,
        });
    }
    Ok((novel, chapter))
}

pub struct TranslationOrchestrator {
    store: Arc<Store>,
    model: Arc<dyn LanguageModel>,
    detection: NameDetectionService,
    context: ContextAssembler,
    config: PipelineConfig,
    call_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationOrchestrator {
    pub fn new(
        store: Arc<Store>,
        model: Arc<dyn LanguageModel>,
        config: PipelineConfig,
        call_timeout: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let detection = NameDetectionService::new(
            Arc::clone(&store),
            Arc::clone(&model),
            config.clone(),
            call_timeout,
        );
        let context = ContextAssembler::new(Arc::clone(&store), config.context_chapters);
        Self {
            store,
            model,
            detection,
            context,
            config,
            call_timeout,
            metrics,
        }
    }

    pub fn detection(&self) -> &NameDetectionService {
        &self.detection
    }

    /// Translate a chapter from its stored source text.
    pub async fn translate_stored_chapter(
        &self,
        novel_id: &str,
        chapter_id: &str,
    ) -> Result<ChapterTranslationResult, PipelineError> {
        let (_, chapter) = novel_and_chapter(&self.store, novel_id, chapter_id)?;
        self.translate_chapter(novel_id, chapter_id, &chapter.source_text)
            .await
    }

    pub async fn translate_chapter(
        &self,
        novel_id: &str,
        chapter_id: &str,
        source_text: &str,
    ) -> Result<ChapterTranslationResult, PipelineError> {
        let total = self.metrics.span(metric_names::CHAPTER_TOTAL);
        let (novel, chapter) = novel_and_chapter(&self.store, novel_id, chapter_id)?;
        let language = resolve_language(&novel.source_language, source_text);
        if let Some(detected) = language_mismatch(&novel.source_language, source_text) {
            warn!(
                novel_id,
                chapter_id,
                declared = %novel.source_language,
                detected = %detected,
                "chapter text does not look like the novel's source language"
            );
        }
        info!(novel_id, chapter_id, number = chapter.number, language = %language, "translating chapter");

        let span = self.metrics.span(metric_names::CONTEXT_ASSEMBLY);
        let context = self.context.assemble(novel_id, chapter_id)?;
        span.finish();

        let span = self.metrics.span(metric_names::NAME_DETECTION);
        let new_names = self
            .detection
            .detect_names(source_text, novel_id, &language)
            .await?;
        span.finish();

        let prompt = prompts::translation(source_text, &context, &language, &novel.target_language);
        let request = CompletionRequest::new(Task::Translate, prompt);
        let span = self.metrics.span(metric_names::TRANSLATE_CALL);
        let raw = match complete_within(self.model.as_ref(), &request, self.call_timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                self.metrics.increment(metric_names::TRANSLATIONS_FAILED);
                warn!(novel_id, chapter_id, error = %e, "translation call failed");
                return Err(PipelineError::TranslationFailure(e));
            }
        };
        span.finish();

        let span = self.metrics.span(metric_names::DICTIONARY_APPLY);
        let dictionary = NameDictionary::for_novel(Arc::clone(&self.store), novel_id)?;
        let processed = dictionary.apply(&raw);
        span.finish();

        let status = chapter
            .status
            .transition(ChapterStatus::after_translation(!new_names.is_empty()))?;
        let detected = self
            .store
            .save_translation(&chapter, source_text, &raw, &processed, status, &new_names)?;
        self.metrics
            .add(metric_names::NAMES_DETECTED, detected.len() as u64);

        // save_translation dropped the old summary if the source changed.
        let summary = match chapter.summary {
            Some(_) if source_text == chapter.source_text => None,
            _ => self.summarize(chapter_id, &processed).await,
        };

        let elapsed_ms = total.finish();
        info!(
            novel_id,
            chapter_id,
            status = %status,
            new_names = detected.len(),
            dictionary_entries = dictionary.len(),
            elapsed_ms,
            "chapter translated"
        );
        Ok(ChapterTranslationResult {
            raw_translation: raw,
            processed_translation: processed,
            new_names: detected,
            status,
            summary,
        })
    }

    /// Summarize and store; `None` on any failure.
    async fn summarize(&self, chapter_id: &str, translated: &str) -> Option<String> {
        let input = truncate_chars(translated, self.config.summary_input_chars);
        let request = CompletionRequest::new(Task::Summarize, prompts::summary(input));
        let span = self.metrics.span(metric_names::SUMMARIZE_CALL);
        let result = complete_within(self.model.as_ref(), &request, self.call_timeout).await;
        span.finish();

        let summary = match result {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!(chapter_id, "summary was empty");
                self.metrics.increment(metric_names::SUMMARIES_FAILED);
                return None;
            }
            Err(e) => {
                warn!(chapter_id, error = %e, "summary generation failed");
                self.metrics.increment(metric_names::SUMMARIES_FAILED);
                return None;
            }
        };
        if let Err(e) = self.store.store_summary(chapter_id, &summary) {
            warn!(chapter_id, error = %e, "summary could not be stored");
            return None;
        }
        Some(summary)
    }
}

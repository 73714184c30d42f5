//! Human review of detected names: promote into the dictionary or ignore,
//! then move the chapter along once nothing is left pending.

use std::sync::Arc;

use tracing::{info, warn};

use crate::model::{
    Chapter, DetectedName, NameType, Resolution, ResolutionAction, ResolutionOutcome, ResolvedAs,
};
use crate::state_machine::ChapterStatus;
use crate::store::{Store, StoreError};
use crate::translate::orchestrator::{novel_and_chapter, PipelineError};

pub struct NameReview {
    store: Arc<Store>,
}

impl NameReview {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Apply each resolution independently. Item-level problems become failed
    /// outcomes and the batch continues; only infrastructure errors abort.
    pub fn resolve_names(
        &self,
        novel_id: &str,
        chapter_id: &str,
        resolutions: &[Resolution],
    ) -> Result<Vec<ResolutionOutcome>, PipelineError> {
        novel_and_chapter(&self.store, novel_id, chapter_id)?;

        let mut outcomes = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            let outcome = self.resolve_one(novel_id, chapter_id, resolution)?;
            if !outcome.success {
                warn!(
                    detected_name_id = %outcome.id,
                    reason = outcome.message.as_deref().unwrap_or_default(),
                    "resolution rejected"
                );
            }
            outcomes.push(outcome);
        }

        let remaining = self.store.count_pending(novel_id, chapter_id)?;
        if remaining == 0 {
            self.finish_review(chapter_id)?;
        }
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(novel_id, chapter_id, succeeded, failed = outcomes.len() - succeeded, remaining, "names resolved");
        Ok(outcomes)
    }

    fn resolve_one(
        &self,
        novel_id: &str,
        chapter_id: &str,
        resolution: &Resolution,
    ) -> Result<ResolutionOutcome, PipelineError> {
        let id = resolution.detected_name_id.as_str();
        let Some(detected) = self.store.detected_name(id)? else {
            return Ok(ResolutionOutcome::failed(id, "unknown detected name"));
        };
        if detected.novel_id != novel_id || detected.chapter_id != chapter_id {
            return Ok(ResolutionOutcome::failed(id, "detected name belongs to another chapter"));
        }
        if detected.status.is_terminal() {
            return Ok(ResolutionOutcome::failed(
                id,
                format!("detected name is already {}", detected.status.as_str()),
            ));
        }

        match resolution.action {
            ResolutionAction::Add => self.add(&detected, resolution),
            ResolutionAction::Ignore => match self.store.ignore_detected_name(id) {
                Ok(()) => Ok(ResolutionOutcome::done(id, ResolvedAs::Ignored)),
                Err(e) => item_failure(id, e),
            },
            ResolutionAction::Unsupported => {
                Ok(ResolutionOutcome::failed(id, "unsupported action"))
            }
        }
    }

    fn add(
        &self,
        detected: &DetectedName,
        resolution: &Resolution,
    ) -> Result<ResolutionOutcome, PipelineError> {
        let id = detected.id.as_str();
        let translated = resolution
            .translated_name
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(detected.suggested_translation.trim());
        if translated.is_empty() {
            return Ok(ResolutionOutcome::failed(id, "no translation given or suggested"));
        }
        let name_type = resolution
            .name_type
            .filter(|t| t.is_dictionary_kind())
            .or(Some(detected.name_type).filter(|t| t.is_dictionary_kind()))
            .unwrap_or(NameType::Character);

        match self.store.promote_detected_name(detected, translated, name_type) {
            Ok(_) => Ok(ResolutionOutcome::done(id, ResolvedAs::Added)),
            Err(e) => item_failure(id, e),
        }
    }

    /// Clear the pending flag and leave `needs_review`.
    fn finish_review(&self, chapter_id: &str) -> Result<(), PipelineError> {
        let Some(chapter) = self.store.chapter(chapter_id)? else {
            return Err(PipelineError::ChapterNotFound(chapter_id.to_string()));
        };
        let status = match chapter.status {
            ChapterStatus::NeedsReview => chapter.status.transition(ChapterStatus::Translated)?,
            other => other,
        };
        self.store.set_chapter_status(chapter_id, status, false)?;
        Ok(())
    }

    /// Mark a translated chapter completed. Refused while detected names are
    /// still pending.
    pub fn complete_chapter(&self, novel_id: &str, chapter_id: &str) -> Result<Chapter, PipelineError> {
        let (_, chapter) = novel_and_chapter(&self.store, novel_id, chapter_id)?;
        let pending = self.store.count_pending(novel_id, chapter_id)?;
        if pending > 0 {
            return Err(PipelineError::PendingNames(pending));
        }
        let status = chapter.status.transition(ChapterStatus::Completed)?;
        self.store.set_chapter_status(chapter_id, status, false)?;
        Ok(Chapter {
            status,
            pending_names: false,
            ..chapter
        })
    }
}

/// Conflicts and invalid rows fail the item; anything else aborts the batch.
fn item_failure(id: &str, e: StoreError) -> Result<ResolutionOutcome, PipelineError> {
    match e {
        StoreError::Conflict(msg) | StoreError::Invalid(msg) | StoreError::NotFound(msg) => {
            Ok(ResolutionOutcome::failed(id, msg))
        }
        other => Err(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NameCandidate, Novel};
    use crate::store::tests::seeded;

    fn candidate(text: &str, suggestion: &str, name_type: NameType) -> NameCandidate {
        NameCandidate {
            original_text: text.into(),
            name_type,
            suggested_translation: suggestion.into(),
            context: None,
        }
    }

    fn reviewed(candidates: &[NameCandidate]) -> (Arc<Store>, Novel, Chapter, Vec<DetectedName>) {
        let (store, novel, chapter) = seeded();
        let detected = store
            .save_translation(
                &chapter,
                &chapter.source_text,
                "raw",
                "processed",
                ChapterStatus::NeedsReview,
                candidates,
            )
            .unwrap();
        (Arc::new(store), novel, chapter, detected)
    }

    fn resolution(id: &str, action: ResolutionAction) -> Resolution {
        Resolution {
            detected_name_id: id.into(),
            action,
            translated_name: None,
            name_type: None,
        }
    }

    #[test]
    fn test_add_and_ignore_finish_review() {
        let (store, novel, chapter, detected) = reviewed(&[
            candidate("영희", "Younghee", NameType::Character),
            candidate("그때", "", NameType::Unknown),
        ]);
        let review = NameReview::new(Arc::clone(&store));
        let outcomes = review
            .resolve_names(
                &novel.id,
                &chapter.id,
                &[
                    Resolution {
                        translated_name: Some("Young-hee".into()),
                        ..resolution(&detected[0].id, ResolutionAction::Add)
                    },
                    resolution(&detected[1].id, ResolutionAction::Ignore),
                ],
            )
            .unwrap();

        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(outcomes[0].action, Some(ResolvedAs::Added));
        assert_eq!(outcomes[1].action, Some(ResolvedAs::Ignored));

        let dictionary = store.name_mappings(&novel.id).unwrap();
        assert_eq!(dictionary.len(), 1);
        assert_eq!(dictionary[0].translated_name, "Young-hee");
        assert_eq!(dictionary[0].name_type, NameType::Character);
        assert_eq!(store.count_pending(&novel.id, &chapter.id).unwrap(), 0);

        let chapter = store.chapter(&chapter.id).unwrap().unwrap();
        assert_eq!(chapter.status, ChapterStatus::Translated);
        assert!(!chapter.pending_names);
    }

    #[test]
    fn test_suggestion_and_default_type_are_used() {
        let (store, novel, chapter, detected) =
            reviewed(&[candidate("한빛", "Hanbit", NameType::Unknown)]);
        let review = NameReview::new(Arc::clone(&store));
        review
            .resolve_names(&novel.id, &chapter.id, &[resolution(&detected[0].id, ResolutionAction::Add)])
            .unwrap();
        let entry = &store.name_mappings(&novel.id).unwrap()[0];
        assert_eq!(entry.translated_name, "Hanbit");
        assert_eq!(entry.name_type, NameType::Character);
    }

    #[test]
    fn test_item_failures_do_not_stop_the_batch() {
        let (store, novel, chapter, detected) = reviewed(&[
            candidate("영희", "", NameType::Character),
            candidate("서울", "Seoul", NameType::Location),
        ]);
        let review = NameReview::new(Arc::clone(&store));
        let outcomes = review
            .resolve_names(
                &novel.id,
                &chapter.id,
                &[
                    resolution("no-such-id", ResolutionAction::Add),
                    resolution(&detected[0].id, ResolutionAction::Add),
                    resolution(&detected[0].id, ResolutionAction::Unsupported),
                    resolution(&detected[1].id, ResolutionAction::Add),
                ],
            )
            .unwrap();

        let successes: Vec<bool> = outcomes.iter().map(|o| o.success).collect();
        assert_eq!(successes, vec![false, false, false, true]);
        assert_eq!(store.name_mappings(&novel.id).unwrap()[0].name_type, NameType::Location);
        assert_eq!(store.count_pending(&novel.id, &chapter.id).unwrap(), 1);
        let chapter = store.chapter(&chapter.id).unwrap().unwrap();
        assert_eq!(chapter.status, ChapterStatus::NeedsReview);
    }

    #[test]
    fn test_conflict_leaves_name_pending() {
        let (store, novel, chapter, detected) =
            reviewed(&[candidate("영희", "Younghee", NameType::Character)]);
        store
            .insert_name_mapping(&novel.id, "영희", "Yeonghui", NameType::Character, None)
            .unwrap();
        let review = NameReview::new(Arc::clone(&store));
        let outcomes = review
            .resolve_names(&novel.id, &chapter.id, &[resolution(&detected[0].id, ResolutionAction::Add)])
            .unwrap();

        assert!(!outcomes[0].success);
        assert_eq!(store.count_pending(&novel.id, &chapter.id).unwrap(), 1);
        assert_eq!(store.name_mappings(&novel.id).unwrap()[0].translated_name, "Yeonghui");
    }

    #[test]
    fn test_terminal_rows_are_not_resolved_twice() {
        let (store, novel, chapter, detected) =
            reviewed(&[candidate("영희", "Younghee", NameType::Character)]);
        let review = NameReview::new(Arc::clone(&store));
        let batch = [resolution(&detected[0].id, ResolutionAction::Ignore)];
        assert!(review.resolve_names(&novel.id, &chapter.id, &batch).unwrap()[0].success);

        let again = review
            .resolve_names(&novel.id, &chapter.id, &[resolution(&detected[0].id, ResolutionAction::Add)])
            .unwrap();
        assert!(!again[0].success);
        assert!(store.name_mappings(&novel.id).unwrap().is_empty());
    }

    #[test]
    fn test_complete_requires_no_pending_names() {
        let (store, novel, chapter, detected) =
            reviewed(&[candidate("영희", "Younghee", NameType::Character)]);
        let review = NameReview::new(Arc::clone(&store));

        let err = review.complete_chapter(&novel.id, &chapter.id).unwrap_err();
        assert!(matches!(err, PipelineError::PendingNames(1)));

        review
            .resolve_names(&novel.id, &chapter.id, &[resolution(&detected[0].id, ResolutionAction::Add)])
            .unwrap();
        let done = review.complete_chapter(&novel.id, &chapter.id).unwrap();
        assert_eq!(done.status, ChapterStatus::Completed);
        assert_eq!(
            store.chapter(&chapter.id).unwrap().unwrap().status,
            ChapterStatus::Completed
        );
    }

    #[test]
    fn test_untranslated_chapter_cannot_complete() {
        let (store, novel, chapter) = seeded();
        let review = NameReview::new(Arc::new(store));
        let err = review.complete_chapter(&novel.id, &chapter.id).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition(_)));
    }
}

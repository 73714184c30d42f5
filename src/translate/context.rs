//! Cross-chapter context for the translation prompt.

use std::sync::Arc;

use tracing::debug;

use crate::model::TranslationContext;
use crate::store::{Store, StoreError};

pub struct ContextAssembler {
    store: Arc<Store>,
    max_chapters: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<Store>, max_chapters: usize) -> Self {
        Self {
            store,
            max_chapters,
        }
    }

    /// Summaries of the most recent other chapters (by number) that have
    /// one, oldest first, plus the novel's full name dictionary. Only the
    /// chapter being translated is excluded, so a re-translation of an early
    /// chapter may see summaries of later ones.
    pub fn assemble(
        &self,
        novel_id: &str,
        exclude_chapter_id: &str,
    ) -> Result<TranslationContext, StoreError> {
        let mut recent = self
            .store
            .recent_summaries(novel_id, exclude_chapter_id, self.max_chapters)?;
        recent.reverse();

        let summary = recent
            .iter()
            .map(|(number, text)| format!("Chapter {number}: {text}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let key_terms = self.store.name_mappings(novel_id)?;

        debug!(
            novel_id,
            chapters = recent.len(),
            key_terms = key_terms.len(),
            "translation context assembled"
        );
        Ok(TranslationContext { summary, key_terms })
    }
}

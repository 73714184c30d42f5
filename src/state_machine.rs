//! Chapter lifecycle: Pending → Translated | NeedsReview → Completed.
//! Re-translation overwrites wholesale, so any translated state may be
//! translated again; editing the source sends a chapter back to Pending.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Pending,
    Translated,
    NeedsReview,
    Completed,
}

impl std::fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChapterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChapterStatus::Pending => "pending",
            ChapterStatus::Translated => "translated",
            ChapterStatus::NeedsReview => "needs_review",
            ChapterStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ChapterStatus::Pending),
            "translated" => Some(ChapterStatus::Translated),
            "needs_review" => Some(ChapterStatus::NeedsReview),
            "completed" => Some(ChapterStatus::Completed),
            _ => None,
        }
    }

    /// Status a translation run lands in.
    pub fn after_translation(has_new_names: bool) -> Self {
        if has_new_names {
            ChapterStatus::NeedsReview
        } else {
            ChapterStatus::Translated
        }
    }

    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: ChapterStatus) -> bool {
        use ChapterStatus::*;
        matches!(
            (self, next),
            // (re-)translation
            (_, Translated) | (_, NeedsReview)
                | (Translated, Completed)
                // source edited
                | (_, Pending)
        ) && !matches!((self, next), (Pending, Pending))
    }

    /// Validate a transition, logging the outcome.
    pub fn transition(self, next: ChapterStatus) -> Result<ChapterStatus, InvalidTransition> {
        if !self.can_transition_to(next) {
            let err = InvalidTransition { from: self, to: next };
            warn!(from = %self, to = %next, "invalid chapter transition");
            return Err(err);
        }
        info!(from = %self, to = %next, "chapter_transition");
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ChapterStatus,
    pub to: ChapterStatus,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid chapter transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::ChapterStatus::*;
    use super::*;

    #[test]
    fn test_translation_lands_by_new_names() {
        assert_eq!(ChapterStatus::after_translation(true), NeedsReview);
        assert_eq!(ChapterStatus::after_translation(false), Translated);
    }

    #[test]
    fn test_pending_cannot_complete() {
        assert!(Pending.transition(Completed).is_err());
        assert!(NeedsReview.transition(Completed).is_err());
        assert_eq!(Translated.transition(Completed), Ok(Completed));
    }

    #[test]
    fn test_retranslation_allowed_from_any_state() {
        for from in [Pending, Translated, NeedsReview, Completed] {
            assert!(from.can_transition_to(Translated));
            assert!(from.can_transition_to(NeedsReview));
        }
    }

    #[test]
    fn test_review_done_moves_to_translated() {
        assert!(NeedsReview.can_transition_to(Translated));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for s in [Pending, Translated, NeedsReview, Completed] {
            assert_eq!(ChapterStatus::parse(s.as_str()), Some(s));
        }
    }
}

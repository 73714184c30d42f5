//! Heuristic proper-noun detection, used when model extraction is unusable.
//! Deliberately imprecise: it guarantees some output for human review, not
//! accuracy. Detectors are keyed by language code; adding a language means
//! registering another detector.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use super::normalize::{JAPANESE, KOREAN};
use crate::model::{NameCandidate, NameType};

pub trait HeuristicDetector: Send + Sync {
    fn language(&self) -> &str;

    /// Never fails; worst case returns nothing.
    fn detect(&self, text: &str) -> Vec<NameCandidate>;
}

/// Runs a fixed list of patterns in order; every non-overlapping match of
/// every pattern becomes a candidate.
pub struct PatternDetector {
    language: String,
    patterns: Vec<Regex>,
}

impl PatternDetector {
    pub fn new(language: &str, patterns: Vec<Regex>) -> Self {
        Self {
            language: language.to_string(),
            patterns,
        }
    }

    /// Hangul runs followed by a title, then bare space-separated pairs.
    pub fn korean() -> Self {
        Self::new(
            KOREAN,
            vec![
                Regex::new(r"([가-힣]{1,2})\s?([가-힣]{1,2})(씨|님|군|양|장군|선생|박사|교수|부장|과장)")
                    .expect("korean title pattern"),
                Regex::new(r"([가-힣]{1,2})\s([가-힣]{1,2})").expect("korean pair pattern"),
            ],
        )
    }

    /// Kanji/kana runs followed by an honorific, then bare space-separated pairs.
    pub fn japanese() -> Self {
        Self::new(
            JAPANESE,
            vec![
                Regex::new(r"([一-龯ぁ-んァ-ン]{1,2})\s?([一-龯ぁ-んァ-ン]{1,2})(さん|くん|ちゃん|先生|様|殿|氏)")
                    .expect("japanese honorific pattern"),
                Regex::new(r"([一-龯ぁ-んァ-ン]{1,2})\s([一-龯ぁ-んァ-ン]{1,2})")
                    .expect("japanese pair pattern"),
            ],
        )
    }
}

impl HeuristicDetector for PatternDetector {
    fn language(&self) -> &str {
        &self.language
    }

    fn detect(&self, text: &str) -> Vec<NameCandidate> {
        self.patterns
            .iter()
            .flat_map(|pattern| pattern.find_iter(text))
            .map(|m| NameCandidate {
                original_text: m.as_str().to_string(),
                name_type: NameType::Unknown,
                suggested_translation: String::new(),
                context: None,
            })
            .collect()
    }
}

/// Heuristic detectors by language code.
pub struct DetectorRegistry {
    detectors: HashMap<String, Box<dyn HeuristicDetector>>,
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(PatternDetector::korean()));
        registry.register(Box::new(PatternDetector::japanese()));
        registry
    }
}

impl DetectorRegistry {
    pub fn empty() -> Self {
        Self {
            detectors: HashMap::new(),
        }
    }

    /// Add or replace the detector for its language.
    pub fn register(&mut self, detector: Box<dyn HeuristicDetector>) {
        self.detectors.insert(detector.language().to_string(), detector);
    }

    pub fn supports(&self, language: &str) -> bool {
        self.detectors.contains_key(language)
    }

    /// Run the detector for `language`; languages without one yield nothing.
    pub fn detect(&self, language: &str, text: &str) -> Vec<NameCandidate> {
        match self.detectors.get(language) {
            Some(detector) => detector.detect(text),
            None => {
                debug!(language, "no heuristic detector for language");
                Vec::new()
            }
        }
    }
}

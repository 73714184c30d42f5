//! Records shared by the store, the translation pipeline and the review step.

use serde::{Deserialize, Serialize};

use crate::state_machine::ChapterStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Novel {
    pub id: String,
    pub title: String,
    pub author: String,
    pub source_language: String,
    pub target_language: String,
    pub description: Option<String>,
    pub created_at: i64,
}

/// Fields required to register a novel.
#[derive(Debug, Clone)]
pub struct NewNovel {
    pub title: String,
    pub author: String,
    pub source_language: String,
    pub target_language: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub novel_id: String,
    pub number: u32,
    pub title: String,
    pub source_text: String,
    pub raw_translation: Option<String>,
    pub processed_translation: Option<String>,
    pub translated_at: Option<i64>,
    pub summary: Option<String>,
    pub status: ChapterStatus,
    pub pending_names: bool,
    pub created_at: i64,
}

/// Kind of proper noun. `Unknown` is only valid on detected names; dictionary
/// entries always carry one of the concrete kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameType {
    Character,
    Location,
    Organization,
    Item,
    Concept,
    Other,
    Unknown,
}

impl NameType {
    pub fn as_str(self) -> &'static str {
        match self {
            NameType::Character => "character",
            NameType::Location => "location",
            NameType::Organization => "organization",
            NameType::Item => "item",
            NameType::Concept => "concept",
            NameType::Other => "other",
            NameType::Unknown => "unknown",
        }
    }

    /// Lenient parse used for model output: anything unrecognised is `Unknown`.
    pub fn parse_lenient(s: &str) -> NameType {
        match s.trim().to_lowercase().as_str() {
            "character" | "person" | "name" => NameType::Character,
            "location" | "place" => NameType::Location,
            "organization" | "organisation" | "group" => NameType::Organization,
            "item" | "object" => NameType::Item,
            "concept" | "term" | "skill" => NameType::Concept,
            "other" => NameType::Other,
            _ => NameType::Unknown,
        }
    }

    pub fn is_dictionary_kind(self) -> bool {
        self != NameType::Unknown
    }
}

impl std::fmt::Display for NameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match NameType::parse_lenient(s) {
            NameType::Unknown if s.trim() != "unknown" => Err(format!("unknown name type: {s}")),
            t => Ok(t),
        }
    }
}

/// One glossary entry: a source-language name and its canonical translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameMapping {
    pub id: String,
    pub novel_id: String,
    pub original_name: String,
    pub translated_name: String,
    #[serde(rename = "type")]
    pub name_type: NameType,
    pub frequency: u32,
    pub first_detected: i64,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    Pending,
    Resolved,
    Ignored,
}

impl DetectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionStatus::Pending => "pending",
            DetectionStatus::Resolved => "resolved",
            DetectionStatus::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DetectionStatus::Pending),
            "resolved" => Some(DetectionStatus::Resolved),
            "ignored" => Some(DetectionStatus::Ignored),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != DetectionStatus::Pending
    }
}

/// A candidate name awaiting a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedName {
    pub id: String,
    pub novel_id: String,
    pub chapter_id: String,
    pub original_text: String,
    pub suggested_translation: String,
    #[serde(rename = "type")]
    pub name_type: NameType,
    pub context: Option<String>,
    pub status: DetectionStatus,
    pub created_at: i64,
}

/// Detection output before it is persisted against a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameCandidate {
    pub original_text: String,
    #[serde(rename = "type")]
    pub name_type: NameType,
    pub suggested_translation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Cross-chapter context handed to the translation prompt.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationContext {
    pub summary: String,
    pub key_terms: Vec<NameMapping>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterTranslationResult {
    pub raw_translation: String,
    pub processed_translation: String,
    pub new_names: Vec<DetectedName>,
    pub status: ChapterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionAction {
    Add,
    Ignore,
    #[serde(other)]
    Unsupported,
}

/// A reviewer's decision about one detected name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub detected_name_id: String,
    pub action: ResolutionAction,
    #[serde(default)]
    pub translated_name: Option<String>,
    #[serde(default, rename = "type")]
    pub name_type: Option<NameType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedAs {
    Added,
    Ignored,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ResolvedAs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResolutionOutcome {
    pub fn done(id: &str, action: ResolvedAs) -> Self {
        Self {
            id: id.to_string(),
            success: true,
            action: Some(action),
            message: None,
        }
    }

    pub fn failed(id: &str, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            success: false,
            action: None,
            message: Some(message.into()),
        }
    }
}

/// Current time as Unix timestamp (seconds).
pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

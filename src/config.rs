//! Runtime configuration: sensible defaults, overridable through `NAMESAKE_*`
//! environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Where the regex fallback looks when model extraction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackScope {
    /// Scan the whole chapter.
    FullText,
    /// Scan only the prefix the model saw.
    Prefix,
}

impl FallbackScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "full" | "full_text" | "fulltext" => Some(FallbackScope::FullText),
            "prefix" => Some(FallbackScope::Prefix),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Per-HTTP-request timeout inside the client.
    pub request_timeout: Duration,
    /// Hard deadline for one completion, retries included.
    pub call_timeout: Duration,
    pub min_request_interval: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.deepseek.com".into(),
            model: "deepseek-chat".into(),
            request_timeout: Duration::from_secs(120),
            call_timeout: Duration::from_secs(300),
            min_request_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Characters of source text sent to name extraction.
    pub detection_prefix_chars: usize,
    pub fallback_scope: FallbackScope,
    /// Prior chapter summaries included in the translation context.
    pub context_chapters: usize,
    /// Characters of translated text sent to summarization.
    pub summary_input_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detection_prefix_chars: 2000,
            fallback_scope: FallbackScope::FullText,
            context_chapters: 3,
            summary_input_chars: 3000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub json_logs: bool,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("namesake.db"),
            json_logs: false,
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = get("NAMESAKE_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(format) = get("NAMESAKE_LOG_FORMAT") {
            config.json_logs = format.eq_ignore_ascii_case("json");
        }

        config.llm.api_key = get("NAMESAKE_API_KEY").or_else(|| get("DEEPSEEK_API_KEY"));
        if let Some(url) = get("NAMESAKE_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Some(model) = get("NAMESAKE_MODEL") {
            config.llm.model = model;
        }
        if let Some(secs) = parse_num::<u64, _>(&get, "NAMESAKE_LLM_TIMEOUT_SECS") {
            config.llm.call_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_num::<u64, _>(&get, "NAMESAKE_MIN_REQUEST_INTERVAL_MS") {
            config.llm.min_request_interval = Duration::from_millis(ms);
        }

        if let Some(n) = parse_num::<usize, _>(&get, "NAMESAKE_DETECTION_PREFIX_CHARS") {
            config.pipeline.detection_prefix_chars = n.max(1);
        }
        if let Some(raw) = get("NAMESAKE_FALLBACK_SCOPE") {
            match FallbackScope::parse(&raw) {
                Some(scope) => config.pipeline.fallback_scope = scope,
                None => warn!(value = %raw, "unknown NAMESAKE_FALLBACK_SCOPE, keeping default"),
            }
        }
        if let Some(n) = parse_num::<usize, _>(&get, "NAMESAKE_CONTEXT_CHAPTERS") {
            config.pipeline.context_chapters = n;
        }
        if let Some(n) = parse_num::<usize, _>(&get, "NAMESAKE_SUMMARY_INPUT_CHARS") {
            config.pipeline.summary_input_chars = n.max(1);
        }

        config
    }
}

fn parse_num<T, F>(get: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring non-numeric setting");
            None
        }
    }
}

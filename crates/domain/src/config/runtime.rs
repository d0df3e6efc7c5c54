use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Delay between the last release of a conversation and its eviction
    /// from memory.
    #[serde(default = "d_eviction_delay_ms")]
    pub eviction_delay_ms: u64,
    #[serde(default = "d_ocr_cache_capacity")]
    pub ocr_cache_capacity: u64,
    #[serde(default = "d_ocr_cache_ttl_secs")]
    pub ocr_cache_ttl_secs: u64,
    /// Where materialized images and forked attachments are written.
    #[serde(default = "d_files_dir")]
    pub files_dir: PathBuf,
    /// Above this serialized size a persisted conversation is flagged.
    #[serde(default = "d_max_conversation_bytes")]
    pub max_conversation_bytes: usize,
    /// Number of trailing messages summarized for a title.
    #[serde(default = "d_title_context")]
    pub title_context_messages: usize,
    /// Number of trailing messages summarized for suggestions.
    #[serde(default = "d_suggestion_context")]
    pub suggestion_context_messages: usize,
    /// Characters kept per message in those summaries.
    #[serde(default = "d_summary_chars")]
    pub summary_chars_per_message: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            eviction_delay_ms: d_eviction_delay_ms(),
            ocr_cache_capacity: d_ocr_cache_capacity(),
            ocr_cache_ttl_secs: d_ocr_cache_ttl_secs(),
            files_dir: d_files_dir(),
            max_conversation_bytes: d_max_conversation_bytes(),
            title_context_messages: d_title_context(),
            suggestion_context_messages: d_suggestion_context(),
            summary_chars_per_message: d_summary_chars(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured web-search backend. The client itself is host-supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchServiceSetting {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "d_result_size")]
    pub result_size: usize,
    /// Whether the backend also offers page scraping.
    #[serde(default)]
    pub scrape: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub services: Vec<SearchServiceSetting>,
    /// Index into `services`.
    #[serde(default)]
    pub selected: usize,
}

impl SearchSettings {
    pub fn selected_service(&self) -> Option<&SearchServiceSetting> {
        self.services.get(self.selected)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Display
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(default)]
    pub nickname: String,
    #[serde(default = "d_locale")]
    pub locale: String,
    /// Default translation target.
    #[serde(default = "d_locale")]
    pub translate_target: String,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            locale: d_locale(),
            translate_target: d_locale(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_eviction_delay_ms() -> u64 {
    500
}
fn d_ocr_cache_capacity() -> u64 {
    100
}
fn d_ocr_cache_ttl_secs() -> u64 {
    30 * 60
}
fn d_files_dir() -> PathBuf {
    PathBuf::from("./data/files")
}
fn d_max_conversation_bytes() -> usize {
    2 * 1024 * 1024
}
fn d_title_context() -> usize {
    4
}
fn d_suggestion_context() -> usize {
    8
}
fn d_summary_chars() -> usize {
    300
}
fn d_result_size() -> usize {
    10
}
fn d_locale() -> String {
    "en".into()
}

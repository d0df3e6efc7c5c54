use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt injection sources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where injected content lands in the outgoing message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPosition {
    BeforeSystemPrompt,
    #[default]
    AfterSystemPrompt,
    /// Immediately before the first user message.
    TopOfChat,
    /// Immediately before the last message.
    BottomOfChat,
    /// `inject_depth` messages back from the end.
    AtDepth,
}

/// A named, always-on injection rule an assistant can opt into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeInjection {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub position: InjectionPosition,
    #[serde(default)]
    pub content: String,
    #[serde(default = "d_4")]
    pub inject_depth: usize,
}

/// A collection of conditionally triggered entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lorebook {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub entries: Vec<LorebookEntry>,
}

/// An entry that fires when one of its keywords matches recent messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LorebookEntry {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub position: InjectionPosition,
    #[serde(default)]
    pub content: String,
    #[serde(default = "d_4")]
    pub inject_depth: usize,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Treat each keyword as a regular expression.
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    /// How many recent non-system messages are scanned for keywords.
    #[serde(default = "d_5")]
    pub scan_depth: usize,
    /// Always active, regardless of keywords.
    #[serde(default)]
    pub constant_active: bool,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_4() -> usize {
    4
}
fn d_5() -> usize {
    5
}

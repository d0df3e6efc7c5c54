use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assistant definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A persona the user chats with. Each conversation belongs to exactly
/// one assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSetting {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Overrides the global chat model for this assistant.
    #[serde(default)]
    pub chat_model_id: Option<Uuid>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Maximum number of history messages sent to the model. 0 = unlimited.
    #[serde(default = "d_64")]
    pub context_message_size: usize,
    /// Template applied to every user message; `{{ message }}` is the text.
    #[serde(default = "d_message_template")]
    pub message_template: String,
    #[serde(default)]
    pub mode_injection_ids: Vec<Uuid>,
    #[serde(default)]
    pub lorebook_ids: Vec<Uuid>,
    #[serde(default)]
    pub regexes: Vec<AssistantRegex>,
    /// Names of host-provided local tools this assistant may call.
    #[serde(default)]
    pub local_tools: Vec<String>,
    /// MCP servers whose tools are exposed to this assistant.
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub search_enabled: bool,
    /// Upper bound on model→tool→model round trips per generation.
    #[serde(default = "d_25")]
    pub max_tool_steps: usize,
    #[serde(default)]
    pub proactive: ProactiveConfig,
}

impl AssistantSetting {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            system_prompt: String::new(),
            chat_model_id: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            context_message_size: 64,
            message_template: d_message_template(),
            mode_injection_ids: Vec::new(),
            lorebook_ids: Vec::new(),
            regexes: Vec::new(),
            local_tools: Vec::new(),
            mcp_servers: Vec::new(),
            search_enabled: false,
            max_tool_steps: 25,
            proactive: ProactiveConfig::default(),
        }
    }

    /// Whether this assistant is configured to call any tool at all.
    pub fn wants_tools(&self) -> bool {
        self.search_enabled || !self.local_tools.is_empty() || !self.mcp_servers.is_empty()
    }
}

/// Find/replace rule applied to assistant output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantRegex {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    pub find_regex: String,
    #[serde(default)]
    pub replace_string: String,
    /// Only rewrite what is displayed; persisted text keeps the original.
    #[serde(default)]
    pub visual_only: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Proactive messaging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which conversation a proactive message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProactiveConversationMode {
    /// Start a fresh conversation for every trigger.
    #[default]
    NewConversation,
    /// Append to the assistant's most recently updated conversation.
    ReuseLatest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Sent as the (hidden) user turn that prompts the assistant.
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "d_60")]
    pub interval_minutes: u32,
    #[serde(default)]
    pub conversation_mode: ProactiveConversationMode,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prompt: String::new(),
            interval_minutes: 60,
            conversation_mode: ProactiveConversationMode::NewConversation,
            quiet_hours: None,
            last_triggered_at: None,
        }
    }
}

/// A daily window (`"HH:MM"` local time) during which nothing is sent.
/// `start > end` wraps midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: String,
    pub end: String,
}

impl QuietHours {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Parse both bounds. `None` if either is malformed.
    pub fn parse(&self) -> Option<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(self.start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(self.end.trim(), "%H:%M").ok()?;
        Some((start, end))
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_25() -> usize {
    25
}
fn d_60() -> u32 {
    60
}
fn d_64() -> usize {
    64
}
fn d_message_template() -> String {
    "{{ message }}".into()
}

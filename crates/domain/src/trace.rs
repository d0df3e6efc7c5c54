use serde::Serialize;

/// Structured trace events emitted across all parley crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    GenerationStarted {
        conversation_id: String,
        assistant_id: String,
        model: String,
        proactive: bool,
    },
    GenerationFinished {
        conversation_id: String,
        outcome: String,
        steps: usize,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    GenerationReplaced {
        conversation_id: String,
    },
    HistoryRepaired {
        conversation_id: String,
        dropped_variants: usize,
        pruned_nodes: usize,
    },
    InjectionsApplied {
        mode_injections: usize,
        lorebook_entries: usize,
    },
    OcrResolved {
        url: String,
        cache_hit: bool,
    },
    ConversationEvicted {
        conversation_id: String,
    },
    ConversationOversized {
        conversation_id: String,
        bytes: usize,
        limit: usize,
    },
    CompressionApplied {
        conversation_id: String,
        removed_nodes: usize,
        summary_chars: usize,
    },
    ProactiveFired {
        assistant_id: String,
        conversation_id: String,
    },
    ProactiveCompleted {
        assistant_id: String,
        conversation_id: String,
        opened: bool,
    },
    ProactiveExpired {
        assistant_id: String,
        conversation_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "parley_event");
    }
}

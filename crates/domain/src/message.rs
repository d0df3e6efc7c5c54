use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stream::Usage;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One typed piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image")]
    Image { url: String },

    #[serde(rename = "document")]
    Document {
        url: String,
        file_name: String,
        mime: String,
    },

    #[serde(rename = "audio")]
    Audio { url: String },

    #[serde(rename = "video")]
    Video { url: String },

    /// Model reasoning. `finished_at` is `None` while the span is still open.
    #[serde(rename = "reasoning")]
    Reasoning {
        reasoning: String,
        created_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finished_at: Option<DateTime<Utc>>,
    },

    #[serde(rename = "tool_call")]
    ToolCall {
        call_id: String,
        tool_name: String,
        /// Raw JSON arguments as streamed by the model.
        arguments: String,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        tool_name: String,
        content: serde_json::Value,
        #[serde(default)]
        arguments: serde_json::Value,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }

    /// URL of a binary attachment part, if this is one.
    pub fn attachment_url(&self) -> Option<&str> {
        match self {
            Self::Image { url }
            | Self::Document { url, .. }
            | Self::Audio { url }
            | Self::Video { url } => Some(url.as_str()),
            _ => None,
        }
    }

    fn with_attachment_url(&self, new_url: String) -> Self {
        match self {
            Self::Image { .. } => Self::Image { url: new_url },
            Self::Document { file_name, mime, .. } => Self::Document {
                url: new_url,
                file_name: file_name.clone(),
                mime: mime.clone(),
            },
            Self::Audio { .. } => Self::Audio { url: new_url },
            Self::Video { .. } => Self::Video { url: new_url },
            other => other.clone(),
        }
    }
}

/// A single message variant. Treated as a value: every transformation
/// returns a new `Message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub parts: Vec<ContentPart>,
    /// The model (settings-level id) that produced this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            parts,
            model_id: None,
            created_at: Utc::now(),
            finished_at: None,
            translation: None,
            usage: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    /// All text parts joined with newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts.iter().any(ContentPart::is_tool_call)
    }

    pub fn has_tool_results(&self) -> bool {
        self.parts.iter().any(ContentPart::is_tool_result)
    }

    pub fn tool_call_ids(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn with_parts(&self, parts: Vec<ContentPart>) -> Self {
        Self {
            parts,
            ..self.clone()
        }
    }

    /// Map every text part through `f`, leaving other parts untouched.
    pub fn map_text(&self, mut f: impl FnMut(&str) -> String) -> Self {
        let parts = self
            .parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => ContentPart::Text { text: f(text) },
                other => other.clone(),
            })
            .collect();
        self.with_parts(parts)
    }

    /// Rewrite attachment URLs (images, documents, audio, video).
    pub fn map_attachment_urls(&self, mut f: impl FnMut(&str) -> Option<String>) -> Self {
        let parts = self
            .parts
            .iter()
            .map(|p| match p.attachment_url().and_then(&mut f) {
                Some(new_url) => p.with_attachment_url(new_url),
                None => p.clone(),
            })
            .collect();
        self.with_parts(parts)
    }

    /// Close any reasoning span that is still open.
    pub fn finish_reasoning(&self, at: DateTime<Utc>) -> Self {
        if !self
            .parts
            .iter()
            .any(|p| matches!(p, ContentPart::Reasoning { finished_at: None, .. }))
        {
            return self.clone();
        }
        let parts = self
            .parts
            .iter()
            .map(|p| match p {
                ContentPart::Reasoning {
                    reasoning,
                    created_at,
                    finished_at: None,
                } => ContentPart::Reasoning {
                    reasoning: reasoning.clone(),
                    created_at: *created_at,
                    finished_at: Some(at),
                },
                other => other.clone(),
            })
            .collect();
        self.with_parts(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_joins_only_text_parts() {
        let msg = Message::new(
            Role::User,
            vec![
                ContentPart::text("hello"),
                ContentPart::Image { url: "file:///a.png".into() },
                ContentPart::text("world"),
            ],
        );
        assert_eq!(msg.text(), "hello\nworld");
    }

    #[test]
    fn map_text_keeps_identity() {
        let msg = Message::user("abc");
        let upper = msg.map_text(|t| t.to_uppercase());
        assert_eq!(upper.id, msg.id);
        assert_eq!(upper.text(), "ABC");
        assert_eq!(msg.text(), "abc");
    }

    #[test]
    fn finish_reasoning_closes_open_spans_only() {
        let start = Utc::now();
        let done = start + chrono::Duration::seconds(5);
        let msg = Message::new(
            Role::Assistant,
            vec![
                ContentPart::Reasoning {
                    reasoning: "early".into(),
                    created_at: start,
                    finished_at: Some(start),
                },
                ContentPart::Reasoning {
                    reasoning: "late".into(),
                    created_at: start,
                    finished_at: None,
                },
            ],
        );
        let closed = msg.finish_reasoning(done);
        let ends: Vec<_> = closed
            .parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Reasoning { finished_at, .. } => *finished_at,
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![start, done]);
    }

    #[test]
    fn map_attachment_urls_rewrites_matching_parts() {
        let msg = Message::new(
            Role::User,
            vec![
                ContentPart::Image { url: "file:///old/a.png".into() },
                ContentPart::Document {
                    url: "https://example.com/doc.pdf".into(),
                    file_name: "doc.pdf".into(),
                    mime: "application/pdf".into(),
                },
            ],
        );
        let moved = msg.map_attachment_urls(|u| {
            u.strip_prefix("file:///old/").map(|rest| format!("file:///new/{rest}"))
        });
        assert_eq!(moved.parts[0].attachment_url(), Some("file:///new/a.png"));
        assert_eq!(
            moved.parts[1].attachment_url(),
            Some("https://example.com/doc.pdf")
        );
    }
}

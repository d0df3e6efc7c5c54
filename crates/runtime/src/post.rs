//! Single-shot completions that follow a conversation: title, suggestions,
//! translation and compression.
//!
//! Each one builds a prompt from a template and a condensed transcript,
//! calls the model without streaming and hands the text back to the
//! caller, which writes it through the normal persistence path.

use std::sync::OnceLock;

use parley_domain::config::AssistantSetting;
use parley_domain::error::{Error, Result};
use parley_domain::message::{Message, Role};
use parley_providers::{ChatRequest, ResolvedModel};
use regex::{Captures, Regex};
use tokio_util::sync::CancellationToken;

fn token_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").ok()).as_ref()
}

fn list_marker_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\d+[.)]\s*|[-*•]\s+)").ok())
        .as_ref()
}

/// Replace `{key}` tokens in one pass. Unknown tokens are left in place
/// and substituted values are never scanned again.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let Some(re) = token_re() else {
        return template.to_owned();
    };
    re.replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match vars.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => (*value).to_owned(),
            None => caps[0].to_owned(),
        }
    })
    .into_owned()
}

/// Condense messages into `Role: text` lines for a prompt.
///
/// Each message keeps at most `max_chars` characters: the head and the
/// tail survive, the middle is elided. Tool traffic and empty messages are
/// skipped.
pub fn conversation_text(messages: &[Message], max_chars: usize) -> String {
    let mut buf = String::new();
    for message in messages {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System | Role::Tool => continue,
        };
        let text = message.text();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        buf.push_str(label);
        buf.push_str(": ");
        buf.push_str(&elide(text, max_chars));
        buf.push('\n');
    }
    buf
}

fn elide(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if max_chars == 0 || count <= max_chars {
        return text.to_owned();
    }
    let head = max_chars * 2 / 3;
    let tail = max_chars - head;
    let start: String = text.chars().take(head).collect();
    let end: String = text.chars().skip(count - tail).collect();
    format!("{start} [...] {end}")
}

/// First non-empty line, without surrounding quotes or trailing period.
pub fn clean_title(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    line.trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '*' | '#'))
        .trim()
        .trim_end_matches('.')
        .trim()
        .to_owned()
}

/// One suggestion per line, with list markers and numbering removed.
pub fn parse_suggestions(raw: &str, limit: usize) -> Vec<String> {
    raw.lines()
        .map(|line| {
            let line = line.trim();
            let line = match list_marker_re() {
                Some(re) => re.replace(line, ""),
                None => line.into(),
            };
            line.trim().trim_matches('"').trim().to_owned()
        })
        .filter(|s| !s.is_empty())
        .take(limit)
        .collect()
}

/// Call `resolved` once with `prompt` and return the trimmed reply.
pub async fn complete(
    resolved: &ResolvedModel,
    assistant: Option<&AssistantSetting>,
    prompt: String,
    cancel: &CancellationToken,
) -> Result<String> {
    let req = ChatRequest {
        temperature: assistant.and_then(|a| a.temperature),
        ..ChatRequest::prompt(resolved.model.model_id.clone(), prompt)
    };
    let reply = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        reply = resolved.provider.chat(req) => reply?,
    };
    let text = reply.content.trim().to_owned();
    if text.is_empty() {
        return Err(Error::provider(
            resolved.provider.provider_id(),
            "model returned an empty reply",
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_leaves_unknown_tokens() {
        let out = fill("{a} and {b} and {c}", &[("a", "1"), ("b", "2")]);
        assert_eq!(out, "1 and 2 and {c}");
    }

    #[test]
    fn fill_does_not_expand_braces_inside_values() {
        let out = fill(
            "Translate {source_text} into {target_lang}",
            &[("source_text", "keep {target_lang} as is"), ("target_lang", "French")],
        );
        assert_eq!(out, "Translate keep {target_lang} as is into French");
    }

    #[test]
    fn conversation_text_skips_tool_traffic_and_elides() {
        let long = "x".repeat(30);
        let msgs = vec![
            Message::system("be nice"),
            Message::user("hello"),
            Message::new(Role::Tool, vec![]),
            Message::assistant(long),
        ];
        let text = conversation_text(&msgs, 9);
        assert_eq!(text, "User: hello\nAssistant: xxxxxx [...] xxx\n");
    }

    #[test]
    fn titles_are_cleaned() {
        assert_eq!(clean_title("\n\"Trip to Lisbon.\"\nextra"), "Trip to Lisbon");
        assert_eq!(clean_title("## Rust lifetimes"), "Rust lifetimes");
    }

    #[test]
    fn suggestions_drop_markers() {
        let raw = "1. Tell me more\n- What about cost?\n\n* \"Show an example\"\n4) fourth";
        assert_eq!(
            parse_suggestions(raw, 3),
            vec!["Tell me more", "What about cost?", "Show an example"]
        );
    }

    #[test]
    fn suggestions_keep_leading_digits_that_are_not_markers() {
        let raw = "3D printing tips
2. 2024 highlights
-5 degrees outside";
        assert_eq!(
            parse_suggestions(raw, 5),
            vec!["3D printing tips", "2024 highlights", "-5 degrees outside"]
        );
    }
}

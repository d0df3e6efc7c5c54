//! `<think>…</think>` prefixes become reasoning parts.

use chrono::Utc;
use parley_domain::message::{ContentPart, Message, Role};

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

/// Split a leading think block off `text`.
///
/// Returns `(reasoning, rest, closed)`. `None` when the text does not start
/// with a think tag. While streaming the closing tag may not have arrived
/// yet, in which case everything after the opening tag is reasoning.
pub fn split_think(text: &str) -> Option<(String, String, bool)> {
    let body = text.trim_start().strip_prefix(OPEN)?;
    match body.find(CLOSE) {
        Some(end) => Some((
            body[..end].trim().to_string(),
            body[end + CLOSE.len()..].trim_start().to_string(),
            true,
        )),
        None => Some((body.trim_start().to_string(), String::new(), false)),
    }
}

fn extract(message: Message) -> Message {
    let has_native = message
        .parts
        .iter()
        .any(|p| matches!(p, ContentPart::Reasoning { .. }));
    if message.role != Role::Assistant || has_native {
        return message;
    }
    let Some(first_text) = message.parts.iter().position(|p| p.as_text().is_some()) else {
        return message;
    };
    let Some((reasoning, rest, closed)) = message.parts[first_text]
        .as_text()
        .and_then(split_think)
    else {
        return message;
    };

    let mut parts = Vec::with_capacity(message.parts.len() + 1);
    parts.push(ContentPart::Reasoning {
        reasoning,
        created_at: message.created_at,
        finished_at: closed.then(Utc::now),
    });
    for (i, part) in message.parts.iter().enumerate() {
        if i == first_text {
            parts.push(ContentPart::text(rest.clone()));
        } else {
            parts.push(part.clone());
        }
    }
    message.with_parts(parts)
}

pub(crate) fn apply(messages: Vec<Message>) -> Vec<Message> {
    messages.into_iter().map(extract).collect()
}

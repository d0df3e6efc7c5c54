//! Inline `data:` images produced by a model are written to disk.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use base64::Engine as _;
use parley_domain::error::Result;
use parley_domain::message::{ContentPart, Message, Role};
use regex::{Captures, Regex};
use uuid::Uuid;

fn markdown_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"!\[([^\]]*)\]\((data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=\s]+)\)").ok()
    })
    .as_ref()
}

/// `(mime, payload)` of a base64 data URL.
fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    Some((mime, payload))
}

fn extension(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        _ => "png",
    }
}

/// Decode `url` into `dir` and return the `file://` URL of the new file.
/// Non-data URLs yield `Ok(None)`.
pub async fn materialize(dir: &Path, url: &str) -> Result<Option<String>> {
    let Some((mime, payload)) = parse_data_url(url) else {
        return Ok(None);
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| parley_domain::error::Error::Other(format!("invalid base64 image: {e}")))?;

    tokio::fs::create_dir_all(dir).await?;
    let path: PathBuf = dir.join(format!("{}.{}", Uuid::new_v4(), extension(mime)));
    tokio::fs::write(&path, bytes).await?;
    let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
    Ok(Some(format!("file://{}", path.display())))
}

async fn rewrite_markdown(dir: &Path, text: &str) -> Result<String> {
    let Some(re) = markdown_re().filter(|_| text.contains("data:image/")) else {
        return Ok(text.to_string());
    };
    let mut replaced = Vec::new();
    for caps in re.captures_iter(text) {
        if let Some(url) = materialize(dir, &caps[2]).await? {
            replaced.push(url);
        }
    }
    let mut urls = replaced.into_iter();
    Ok(re
        .replace_all(text, |caps: &Captures<'_>| match urls.next() {
            Some(url) => format!("![{}]({url})", &caps[1]),
            None => caps[0].to_string(),
        })
        .into_owned())
}

async fn finish_one(dir: &Path, message: Message) -> Message {
    if message.role != Role::Assistant {
        return message;
    }
    let mut parts = Vec::with_capacity(message.parts.len());
    for part in &message.parts {
        let next = match part {
            ContentPart::Image { url } => match materialize(dir, url).await {
                Ok(Some(file_url)) => ContentPart::Image { url: file_url },
                Ok(None) => part.clone(),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to store generated image");
                    part.clone()
                }
            },
            ContentPart::Text { text } => match rewrite_markdown(dir, text).await {
                Ok(text) => ContentPart::Text { text },
                Err(e) => {
                    tracing::warn!(error = %e, "failed to store inline image");
                    part.clone()
                }
            },
            other => other.clone(),
        };
        parts.push(next);
    }
    message.with_parts(parts)
}

pub(crate) async fn on_generation_finish(dir: &Path, messages: Vec<Message>) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        out.push(finish_one(dir, message).await);
    }
    out
}

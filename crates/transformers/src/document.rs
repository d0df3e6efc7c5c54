//! Attached documents become a text preamble on the user message.

use std::path::{Path, PathBuf};

use parley_domain::error::{Error, Result};
use parley_domain::message::{ContentPart, Message, Role};

use crate::context::TransformContext;

/// Extracts plain text from an attached file.
///
/// Binary formats (PDF, DOCX, PPTX) are parsed by the host; the built-in
/// [`PlainTextReader`] only handles text files.
#[async_trait::async_trait]
pub trait DocumentReader: Send + Sync {
    async fn read(&self, url: &str, file_name: &str, mime: &str) -> Result<String>;
}

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "json", "toml", "yaml", "yml", "xml", "html", "log", "rs",
    "py", "js", "ts",
];

/// Reads `file://` URLs and bare paths whose type is textual.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextReader;

impl PlainTextReader {
    fn is_text(file_name: &str, mime: &str) -> bool {
        if mime.starts_with("text/") || mime == "application/json" {
            return true;
        }
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }
}

/// Local path of a `file://` URL or bare path.
pub fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if url.contains("://") || url.starts_with("data:") {
        return None;
    }
    Some(PathBuf::from(url))
}

#[async_trait::async_trait]
impl DocumentReader for PlainTextReader {
    async fn read(&self, url: &str, file_name: &str, mime: &str) -> Result<String> {
        if !Self::is_text(file_name, mime) {
            return Err(Error::Capability(format!(
                "no reader for {file_name} ({mime})"
            )));
        }
        let path = local_path(url)
            .ok_or_else(|| Error::NotFound(format!("{url} is not a local file")))?;
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

fn preamble(file_name: &str, body: &str) -> String {
    format!("## user sent a file: {file_name}\n<content>\n{body}\n</content>\n")
}

pub(crate) async fn apply(
    reader: &dyn DocumentReader,
    ctx: &TransformContext,
    messages: Vec<Message>,
) -> Result<Vec<Message>> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let has_docs = message
            .parts
            .iter()
            .any(|p| matches!(p, ContentPart::Document { .. }));
        if message.role != Role::User || !has_docs {
            out.push(message);
            continue;
        }

        let mut preambles = Vec::new();
        let mut rest = Vec::new();
        for part in &message.parts {
            match part {
                ContentPart::Document { url, file_name, mime } => {
                    ctx.check_cancelled()?;
                    let body = match reader.read(url, file_name, mime).await {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(file = %file_name, error = %e, "document could not be read");
                            format!("[unable to read file: {e}]")
                        }
                    };
                    preambles.push(ContentPart::text(preamble(file_name, &body)));
                }
                other => rest.push(other.clone()),
            }
        }
        preambles.extend(rest);
        out.push(message.with_parts(preambles));
    }
    Ok(out)
}

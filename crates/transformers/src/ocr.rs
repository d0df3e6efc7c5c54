//! Image descriptions for models without image input.

use std::time::Duration;

use moka::future::Cache;
use parley_domain::capability::ModelRole;
use parley_domain::error::{Error, Result};
use parley_domain::message::{ContentPart, Message, Role};
use parley_domain::trace::TraceEvent;
use parley_providers::{ChatRequest, ProviderRegistry};

use crate::context::TransformContext;

/// Capacity-bounded, time-expiring cache of descriptions keyed by image URL.
#[derive(Clone)]
pub struct OcrCache {
    inner: Cache<String, String>,
}

impl OcrCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, url: &str) -> Option<String> {
        self.inner.get(url).await
    }

    pub async fn insert(&self, url: String, description: String) {
        self.inner.insert(url, description).await;
    }

    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for OcrCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

const UNAVAILABLE: &str = "[image omitted: it could not be described]";

fn wrap(description: &str) -> String {
    format!("<image_file_description>\n{description}\n</image_file_description>")
}

async fn describe(
    registry: &ProviderRegistry,
    ctx: &TransformContext,
    url: &str,
) -> Result<String> {
    let resolved = registry.resolve(&ctx.settings, ModelRole::Ocr, Some(&ctx.assistant))?;
    let req = ChatRequest {
        model: resolved.model.model_id.clone(),
        messages: vec![Message::new(
            Role::User,
            vec![
                ContentPart::text(ctx.settings.prompts.ocr.clone()),
                ContentPart::Image { url: url.to_string() },
            ],
        )],
        ..ChatRequest::default()
    };
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
        resp = resolved.provider.chat(req) => Ok(resp?.content.trim().to_string()),
    }
}

pub(crate) async fn apply(
    registry: &ProviderRegistry,
    cache: &OcrCache,
    ctx: &TransformContext,
    messages: Vec<Message>,
) -> Result<Vec<Message>> {
    if ctx.model.supports_images() {
        return Ok(messages);
    }

    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let has_images = message
            .parts
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. }));
        if message.role != Role::User || !has_images {
            out.push(message);
            continue;
        }

        let mut parts = Vec::with_capacity(message.parts.len());
        for part in &message.parts {
            let ContentPart::Image { url } = part else {
                parts.push(part.clone());
                continue;
            };
            ctx.check_cancelled()?;

            let text = match cache.get(url).await {
                Some(hit) => {
                    TraceEvent::OcrResolved { url: url.clone(), cache_hit: true }.emit();
                    wrap(&hit)
                }
                None => match describe(registry, ctx, url).await {
                    Ok(description) => {
                        cache.insert(url.clone(), description.clone()).await;
                        TraceEvent::OcrResolved { url: url.clone(), cache_hit: false }.emit();
                        wrap(&description)
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "image description failed");
                        UNAVAILABLE.to_string()
                    }
                },
            };
            parts.push(ContentPart::text(text));
        }
        out.push(message.with_parts(parts));
    }
    Ok(out)
}

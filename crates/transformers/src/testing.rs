use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parley_domain::config::{AssistantSetting, ModelSetting, ProviderSetting, Settings};
use parley_domain::error::Result;
use parley_domain::stream::{BoxStream, StreamEvent};
use parley_providers::{ChatRequest, ChatResponse, LlmProvider, ProviderRegistry};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::TransformContext;
use crate::pipeline::StageEnv;

pub(crate) fn ctx() -> TransformContext {
    TransformContext::new(
        Arc::new(Settings::default()),
        AssistantSetting::new("Ada"),
        ModelSetting::new("text-only-model"),
        Uuid::new_v4(),
        CancellationToken::new(),
    )
}

pub(crate) fn empty_env() -> StageEnv {
    let dir = std::env::temp_dir().join("parley-transformers-tests");
    let runtime = parley_domain::config::RuntimeSettings {
        files_dir: dir,
        ..Default::default()
    };
    StageEnv::new(Arc::new(ProviderRegistry::new()), &runtime)
}

/// Answers every `chat` with a fixed text and counts the calls.
pub(crate) struct CountingProvider {
    reply: String,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub(crate) fn new(reply: &str) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for CountingProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse {
            content: self.reply.clone(),
            model: req.model,
            ..ChatResponse::default()
        })
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let reply = self.reply.clone();
        Ok(Box::pin(async_stream::stream! {
            yield Ok(StreamEvent::Token { text: reply });
        }))
    }

    fn provider_id(&self) -> &str {
        "counting"
    }
}

/// Context whose settings route the OCR role to `provider`.
pub(crate) fn ctx_with_ocr(provider: Arc<CountingProvider>) -> (TransformContext, ProviderRegistry) {
    let vision = ModelSetting::new("vision-model");
    let chat = ModelSetting::new("text-only-model");
    let provider_id = Uuid::new_v4();
    let settings = Settings {
        chat_model_id: Some(chat.id),
        ocr_model_id: Some(vision.id),
        providers: vec![ProviderSetting {
            id: provider_id,
            name: "local".into(),
            enabled: true,
            models: vec![chat.clone(), vision],
        }],
        ..Settings::default()
    };
    let mut c = ctx();
    c.settings = Arc::new(settings);
    c.model = chat;
    let registry = ProviderRegistry::new().with(provider_id, provider);
    (c, registry)
}

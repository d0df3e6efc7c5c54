//! Registry resolution against a settings snapshot, with a stand-in client.

use std::sync::Arc;

use parley_domain::capability::ModelRole;
use parley_domain::config::{AssistantSetting, ModelSetting, ProviderSetting, Settings};
use parley_domain::error::{Error, Result};
use parley_domain::stream::{BoxStream, StreamEvent};
use parley_providers::{ChatRequest, ChatResponse, LlmProvider, ProviderRegistry};
use uuid::Uuid;

struct Echo;

#[async_trait::async_trait]
impl LlmProvider for Echo {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        Ok(ChatResponse {
            content: req.messages.last().map(|m| m.text()).unwrap_or_default(),
            model: req.model,
            ..ChatResponse::default()
        })
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        Ok(Box::pin(async_stream::stream! {
            yield Ok(StreamEvent::Token { text: "hi".into() });
        }))
    }

    fn provider_id(&self) -> &str {
        "echo"
    }
}

fn settings() -> (Settings, Uuid, Uuid, Uuid) {
    let chat = ModelSetting::new("chat-large");
    let small = ModelSetting::new("chat-small");
    let provider_id = Uuid::new_v4();
    let (chat_id, small_id) = (chat.id, small.id);
    let settings = Settings {
        chat_model_id: Some(chat_id),
        providers: vec![ProviderSetting {
            id: provider_id,
            name: "local".into(),
            enabled: true,
            models: vec![chat, small],
        }],
        ..Settings::default()
    };
    (settings, provider_id, chat_id, small_id)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Role resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn assistant_override_wins_for_chat() {
    let (settings, provider_id, _, small_id) = settings();
    let registry = ProviderRegistry::new().with(provider_id, Arc::new(Echo));
    let mut assistant = AssistantSetting::new("terse");
    assistant.chat_model_id = Some(small_id);

    let resolved = registry
        .resolve(&settings, ModelRole::Chat, Some(&assistant))
        .unwrap();
    assert_eq!(resolved.model.model_id, "chat-small");
    assert_eq!(resolved.provider.provider_id(), "echo");
}

#[test]
fn missing_client_is_a_config_error() {
    let (settings, _, _, _) = settings();
    let registry = ProviderRegistry::new();
    let err = registry.resolve(&settings, ModelRole::Chat, None).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn suggestion_role_has_no_fallback() {
    let (settings, provider_id, _, _) = settings();
    let registry = ProviderRegistry::new().with(provider_id, Arc::new(Echo));
    assert!(registry
        .resolve(&settings, ModelRole::Suggestion, None)
        .is_err());
    assert!(registry.resolve(&settings, ModelRole::Title, None).is_ok());
}

#[tokio::test]
async fn resolved_client_is_callable() {
    let (settings, provider_id, chat_id, _) = settings();
    let registry = ProviderRegistry::new().with(provider_id, Arc::new(Echo));
    let resolved = registry.resolve_model(&settings, chat_id).unwrap();
    let resp = resolved
        .provider
        .chat(ChatRequest::prompt(&resolved.model.model_id, "ping"))
        .await
        .unwrap();
    assert_eq!(resp.content, "ping");
    assert_eq!(resp.model, "chat-large");
}

//! Test doubles shared by unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parley_domain::capability::ModelAbility;
use parley_domain::config::{AssistantSetting, ModelSetting, ProviderSetting, Settings};
use parley_domain::error::{Error, Result};
use parley_domain::stream::{BoxStream, StreamEvent, Usage};
use parley_providers::{ChatRequest, ChatResponse, LlmProvider, ProviderRegistry};
use parley_store::{InMemoryConversationStore, SettingsStore};
use uuid::Uuid;

use crate::orchestrator::ChatService;
use crate::tools::ToolRegistry;

/// One scripted `chat_stream` answer.
#[derive(Debug, Clone)]
pub enum Step {
    /// Stream these events, then end.
    Events(Vec<StreamEvent>),
    /// Stream these events with a pause before each one.
    Slow(Vec<StreamEvent>, Duration),
    /// Stream one token, then never finish.
    Hang,
    /// Refuse the request.
    Fail(String),
}

impl Step {
    pub fn text(text: &str) -> Self {
        Self::Events(vec![
            StreamEvent::Token { text: text.into() },
            StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                finish_reason: Some("stop".into()),
            },
        ])
    }

    pub fn tool_call(call_id: &str, tool_name: &str, arguments: &str) -> Self {
        Self::Events(vec![
            StreamEvent::ToolCallStarted {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
            },
            StreamEvent::ToolCallDelta {
                call_id: call_id.into(),
                delta: arguments.into(),
            },
            StreamEvent::Done {
                usage: None,
                finish_reason: Some("tool_calls".into()),
            },
        ])
    }
}

/// Counts streams dropped before their last event.
struct StreamGuard {
    counter: Arc<AtomicUsize>,
    completed: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// An [`LlmProvider`] that plays back [`Step`]s in order. Once the script
/// runs out every stream answers with `fallback`. Non-streaming `chat`
/// always answers with `chat_reply`.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    fallback: String,
    chat_reply: Mutex<String>,
    chat_failure: Mutex<Option<Error>>,
    requests: Mutex<Vec<ChatRequest>>,
    stream_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    abandoned: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fallback: "ok".into(),
            chat_reply: Mutex::new("Scripted title".into()),
            chat_failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            stream_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            abandoned: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Self::new(vec![Step::text(text)])
    }

    pub fn set_chat_reply(&self, reply: &str) {
        *self.chat_reply.lock() = reply.into();
    }

    /// Make the next non-streaming `chat` fail with `error`.
    pub fn fail_next_chat(&self, error: Error) {
        *self.chat_failure.lock() = Some(error);
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Streams dropped by the consumer before they finished.
    pub fn abandoned_streams(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Every request seen so far, streaming and non-streaming.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        let model = req.model.clone();
        self.requests.lock().push(req);
        if let Some(error) = self.chat_failure.lock().take() {
            return Err(error);
        }
        Ok(ChatResponse {
            content: self.chat_reply.lock().clone(),
            model,
            ..ChatResponse::default()
        })
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(req);
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| Step::text(&self.fallback));

        let counter = self.abandoned.clone();
        let guard = move || StreamGuard {
            counter,
            completed: false,
        };
        match step {
            Step::Fail(message) => Err(Error::provider("scripted", message)),
            Step::Events(events) => Ok(Box::pin(async_stream::stream! {
                let mut guard = guard();
                for event in events {
                    yield Ok(event);
                }
                guard.completed = true;
            })),
            Step::Slow(events, pause) => Ok(Box::pin(async_stream::stream! {
                let mut guard = guard();
                for event in events {
                    tokio::time::sleep(pause).await;
                    yield Ok(event);
                }
                guard.completed = true;
            })),
            Step::Hang => Ok(Box::pin(async_stream::stream! {
                let _guard = guard();
                yield Ok(StreamEvent::Token { text: "partial".into() });
                std::future::pending::<()>().await;
            })),
        }
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

/// Settings with one provider, one chat model and one assistant, plus a
/// registry routing the provider to `provider`.
pub struct Fixture {
    pub settings: Settings,
    pub registry: ProviderRegistry,
    pub assistant_id: Uuid,
    pub model_id: Uuid,
}

impl Fixture {
    pub fn new(provider: Arc<ScriptedProvider>) -> Self {
        let mut model = ModelSetting::new("scripted-model");
        model.abilities.push(ModelAbility::Tool);
        let assistant = AssistantSetting::new("Ada");
        let provider_id = Uuid::new_v4();
        let assistant_id = assistant.id;
        let model_id = model.id;
        let settings = Settings {
            chat_model_id: Some(model.id),
            selected_assistant_id: Some(assistant.id),
            providers: vec![ProviderSetting {
                id: provider_id,
                name: "scripted".into(),
                enabled: true,
                models: vec![model],
            }],
            assistants: vec![assistant],
            ..Settings::default()
        };
        let registry = ProviderRegistry::new().with(provider_id, provider);
        Self {
            settings,
            registry,
            assistant_id,
            model_id,
        }
    }

    pub fn assistant_mut(&mut self) -> &mut AssistantSetting {
        &mut self.settings.assistants[0]
    }

    /// A chat service over an in-memory repository with short eviction
    /// debounce.
    pub fn service(mut self, tools: ToolRegistry) -> ChatService {
        self.settings.runtime.eviction_delay_ms = 20;
        self.settings.runtime.files_dir = std::env::temp_dir().join("parley-runtime-tests");
        ChatService::builder(
            Arc::new(SettingsStore::new(self.settings)),
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(self.registry),
        )
        .tools(tools)
        .build()
    }
}

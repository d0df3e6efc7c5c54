//! The generation orchestrator.
//!
//! [`ChatService`] owns the resident conversation states, the per
//! conversation generation tasks and the error list. Every conversation
//! command goes through it; progress is observed through `watch` and
//! `broadcast` channels rather than return values.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_domain::capability::ModelRole;
use parley_domain::config::AssistantSetting;
use parley_domain::conversation::{Conversation, MessageNode};
use parley_domain::error::{Error, Result};
use parley_domain::message::{ContentPart, Message, Role};
use parley_domain::trace::TraceEvent;
use parley_providers::{ProviderRegistry, ResolvedModel};
use parley_store::{ConversationRepository, SettingsStore};
use parley_transformers::document::local_path;
use parley_transformers::{Pipeline, StageEnv, TransformContext};
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::errors::ChatErrorList;
use crate::generation::{run_generation, GenerationJob, GenerationOutcome};
use crate::post;
use crate::state_store::ConversationStateStore;
use crate::tasks::GenerationTasks;
use crate::tools::ToolRegistry;

/// Per-message character budget when condensing history for compression.
const COMPRESSION_CHARS_PER_MESSAGE: usize = 2000;
const MAX_SUGGESTIONS: usize = 5;

/// In-flight assistant message, display-transformed.
#[derive(Debug, Clone)]
pub struct GenerationPreview {
    pub conversation_id: Uuid,
    pub message: Message,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    settings: Arc<SettingsStore>,
    repository: Arc<dyn ConversationRepository>,
    registry: Arc<ProviderRegistry>,
    pipeline: Pipeline,
    tools: ToolRegistry,
    state: ConversationStateStore,
    tasks: GenerationTasks,
    errors: ChatErrorList,
    generation_done: broadcast::Sender<Uuid>,
    previews: broadcast::Sender<GenerationPreview>,
}

pub struct ChatServiceBuilder {
    settings: Arc<SettingsStore>,
    repository: Arc<dyn ConversationRepository>,
    registry: Arc<ProviderRegistry>,
    tools: ToolRegistry,
    pipeline: Option<Pipeline>,
}

impl ChatServiceBuilder {
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the default pipeline (default stage order over a
    /// [`StageEnv`] built from the runtime settings).
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> ChatService {
        let pipeline = self.pipeline.unwrap_or_else(|| {
            let runtime = self.settings.snapshot().runtime.clone();
            Pipeline::new(StageEnv::new(self.registry.clone(), &runtime))
        });
        let (generation_done, _) = broadcast::channel(64);
        let (previews, _) = broadcast::channel(256);
        ChatService {
            inner: Arc::new(Inner {
                settings: self.settings,
                repository: self.repository,
                registry: self.registry,
                pipeline,
                tools: self.tools,
                state: ConversationStateStore::new(),
                tasks: GenerationTasks::new(),
                errors: ChatErrorList::new(),
                generation_done,
                previews,
            }),
        }
    }
}

/// Cheap to clone; all clones share one orchestrator.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<Inner>,
}

impl ChatService {
    pub fn builder(
        settings: Arc<SettingsStore>,
        repository: Arc<dyn ConversationRepository>,
        registry: Arc<ProviderRegistry>,
    ) -> ChatServiceBuilder {
        ChatServiceBuilder {
            settings,
            repository,
            registry,
            tools: ToolRegistry::new(),
            pipeline: None,
        }
    }

    // ── Collaborators ───────────────────────────────────────────────

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.inner.settings
    }

    pub fn repository(&self) -> &Arc<dyn ConversationRepository> {
        &self.inner.repository
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.inner.registry
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn errors(&self) -> &ChatErrorList {
        &self.inner.errors
    }

    pub(crate) fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }

    pub(crate) fn state(&self) -> &ConversationStateStore {
        &self.inner.state
    }

    pub(crate) fn preview(&self, preview: GenerationPreview) {
        let _ = self.inner.previews.send(preview);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Observation
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Observe a conversation, loading or creating it as needed.
    ///
    /// An id unknown to the repository seeds an empty conversation for
    /// `assistant_id`, or the selected assistant when `None`. The new
    /// conversation is only persisted by its first mutation.
    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        assistant_id: Option<Uuid>,
    ) -> Result<watch::Receiver<Conversation>> {
        self.load(conversation_id, assistant_id).await?;
        self.inner
            .state
            .subscribe(conversation_id)
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))
    }

    /// Resident snapshot, without touching the repository.
    pub fn conversation(&self, conversation_id: Uuid) -> Option<Conversation> {
        self.inner.state.get(conversation_id)
    }

    /// Ids of conversations with a generation in flight.
    pub fn active_generations(&self) -> watch::Receiver<HashSet<Uuid>> {
        self.inner.tasks.watch_active()
    }

    pub fn is_generating(&self, conversation_id: Uuid) -> bool {
        self.inner.tasks.is_running(conversation_id)
    }

    /// Tasks registered for `conversation_id` that are still executing.
    pub fn live_generation_count(&self, conversation_id: Uuid) -> usize {
        self.inner.tasks.live_count(conversation_id)
    }

    /// Emits a conversation id every time a generation for it ends without
    /// being cancelled.
    pub fn subscribe_generation_done(&self) -> broadcast::Receiver<Uuid> {
        self.inner.generation_done.subscribe()
    }

    pub fn subscribe_previews(&self) -> broadcast::Receiver<GenerationPreview> {
        self.inner.previews.subscribe()
    }

    /// Current messages rewritten for display only.
    pub fn visual_messages(&self, conversation: &Conversation) -> Vec<Message> {
        let messages = conversation.current_messages();
        match self.display_context(conversation) {
            Some(ctx) => self.inner.pipeline.visual_transform(&ctx, messages),
            None => messages,
        }
    }

    fn display_context(&self, conversation: &Conversation) -> Option<TransformContext> {
        let settings = self.inner.settings.snapshot();
        let assistant = settings.find_assistant(conversation.assistant_id)?.clone();
        let (_, model) = settings.model_for_role(ModelRole::Chat, Some(&assistant))?;
        let model = model.clone();
        Some(TransformContext::new(
            settings,
            assistant,
            model,
            conversation.id,
            CancellationToken::new(),
        ))
    }

    // ── Reference counting ──────────────────────────────────────────

    pub fn add_ref(&self, conversation_id: Uuid) {
        self.inner.state.add_ref(conversation_id);
    }

    pub fn remove_ref(&self, conversation_id: Uuid) {
        self.inner.state.remove_ref(conversation_id);
        self.schedule_eviction(conversation_id);
    }

    fn schedule_eviction(&self, conversation_id: Uuid) {
        let delay = Duration::from_millis(self.inner.settings.snapshot().runtime.eviction_delay_ms);
        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let busy = service.inner.tasks.is_running(conversation_id);
            if service.inner.state.evict_if_unused(conversation_id, busy) {
                tracing::debug!(conversation_id = %conversation_id, "conversation evicted");
                TraceEvent::ConversationEvicted {
                    conversation_id: conversation_id.to_string(),
                }
                .emit();
            }
        });
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Generation commands
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Append a user message and, if `answer`, start a reply.
    ///
    /// Any running generation for the conversation is cancelled first.
    /// Returns once the message is persisted; the reply streams into the
    /// conversation state.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        parts: Vec<ContentPart>,
        answer: bool,
    ) -> Result<()> {
        let result = self
            .send(conversation_id, Message::new(Role::User, parts), answer, false)
            .await;
        self.report(conversation_id, result)
    }

    /// Send the assistant's proactive prompt into `conversation_id` and
    /// answer it. Does not count as user activity.
    pub async fn send_proactive_message(
        &self,
        conversation_id: Uuid,
        assistant_id: Uuid,
        prompt: &str,
    ) -> Result<()> {
        self.load(conversation_id, Some(assistant_id)).await?;
        self.send(conversation_id, Message::user(prompt), true, true)
            .await
    }

    async fn send(
        &self,
        conversation_id: Uuid,
        message: Message,
        answer: bool,
        proactive: bool,
    ) -> Result<()> {
        self.inner.tasks.cancel(conversation_id);
        self.load(conversation_id, None).await?;
        let conversation = self
            .inner
            .state
            .modify(conversation_id, |c| c.with_appended(message))
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))?;
        self.persist(&conversation).await?;
        if !proactive {
            self.inner.settings.record_user_message(Utc::now());
        }
        if answer {
            self.start_generation(conversation_id, None, proactive);
        } else {
            self.schedule_eviction(conversation_id);
        }
        Ok(())
    }

    /// Regenerate from `message_id`.
    ///
    /// A user message truncates everything after it and is answered again.
    /// An assistant message gets a new variant built from the nodes before
    /// it when `regenerate_assistant` is set; otherwise nothing happens.
    pub async fn regenerate_at(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        regenerate_assistant: bool,
    ) -> Result<()> {
        let result = self
            .regenerate(conversation_id, message_id, regenerate_assistant)
            .await;
        self.report(conversation_id, result)
    }

    async fn regenerate(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        regenerate_assistant: bool,
    ) -> Result<()> {
        let conversation = self.load(conversation_id, None).await?;
        let index = conversation
            .node_index_of(message_id)
            .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
        let node = &conversation.nodes[index];
        let role = conversation
            .find_message(message_id)
            .map(|m| m.role)
            .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;

        let regenerate_node = match role {
            Role::User => None,
            Role::Assistant if regenerate_assistant => Some(node.id),
            Role::Assistant => return Ok(()),
            Role::System | Role::Tool => {
                return Err(Error::Other(format!("cannot regenerate a {role:?} message")))
            }
        };

        self.inner.tasks.cancel(conversation_id);
        let updated = self
            .inner
            .state
            .modify(conversation_id, |c| {
                let mut next = c.truncated_to(index + 1);
                if let Some(node) = next.nodes.get_mut(index) {
                    if let Some(pos) = node.messages.iter().position(|m| m.id == message_id) {
                        node.select_index = pos;
                    }
                }
                next
            })
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))?;
        self.persist(&updated).await?;
        self.start_generation(conversation_id, regenerate_node, false);
        Ok(())
    }

    /// Cancel the running generation. Streamed content stays.
    pub fn cancel(&self, conversation_id: Uuid) -> bool {
        self.inner.tasks.cancel(conversation_id)
    }

    /// Cancel every running generation.
    pub fn shutdown(&self) {
        self.inner.tasks.cancel_all();
    }

    fn start_generation(&self, conversation_id: Uuid, regenerate_node: Option<Uuid>, proactive: bool) {
        let (task_id, cancel) = self.inner.tasks.prepare();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let assistant_id = self
            .inner
            .state
            .get(conversation_id)
            .map(|c| c.assistant_id.to_string())
            .unwrap_or_default();
        let span = tracing::info_span!(
            "generation",
            conversation_id = %conversation_id,
            assistant_id = %assistant_id,
            proactive,
        );
        let job = GenerationJob {
            conversation_id,
            regenerate_node,
            proactive,
        };

        let service = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(
            async move {
                // Wait until the task is registered so `finish` sees it.
                let _ = ready_rx.await;
                let outcome = run_generation(&service, job, token).await;
                service.inner.tasks.finish(conversation_id, task_id);
                if outcome != GenerationOutcome::Cancelled {
                    service.inner.settings.record_conversation_done(Utc::now());
                    let _ = service.inner.generation_done.send(conversation_id);
                }
                if outcome == GenerationOutcome::Completed {
                    service.spawn_follow_ups(conversation_id);
                }
                service.schedule_eviction(conversation_id);
            }
            .instrument(span),
        );

        if self.inner.tasks.install(conversation_id, task_id, cancel, handle) {
            tracing::debug!(conversation_id = %conversation_id, "replaced running generation");
            TraceEvent::GenerationReplaced {
                conversation_id: conversation_id.to_string(),
            }
            .emit();
        }
        let _ = ready_tx.send(());
    }

    /// Title and suggestions after a successful reply. Holds a reference
    /// so the conversation is not evicted while they run.
    fn spawn_follow_ups(&self, conversation_id: Uuid) {
        self.add_ref(conversation_id);
        let service = self.clone();
        let span = tracing::info_span!("follow_ups", conversation_id = %conversation_id);
        tokio::spawn(
            async move {
                let (title, suggestions) = tokio::join!(
                    service.generate_title(conversation_id, false),
                    service.generate_suggestions(conversation_id),
                );
                if let Err(e) = title {
                    tracing::warn!(error = %e, "title generation failed");
                }
                if let Err(e) = suggestions {
                    tracing::warn!(error = %e, "suggestion generation failed");
                }
                service.remove_ref(conversation_id);
            }
            .instrument(span),
        );
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // History commands
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Replace the parts of one variant in place.
    pub async fn edit_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        parts: Vec<ContentPart>,
    ) -> Result<()> {
        self.mutate(conversation_id, |c| {
            let message = c
                .find_message(message_id)
                .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
            Ok(c.with_message_replaced(&message.with_parts(parts)))
        })
        .await
        .map(|_| ())
    }

    pub async fn select_variant(
        &self,
        conversation_id: Uuid,
        node_id: Uuid,
        index: usize,
    ) -> Result<()> {
        self.mutate(conversation_id, |c| {
            let mut next = c.clone();
            let node = next
                .nodes
                .iter_mut()
                .find(|n| n.id == node_id)
                .ok_or_else(|| Error::NotFound(format!("node {node_id}")))?;
            if index >= node.messages.len() {
                return Err(Error::Other(format!(
                    "variant {index} out of range (node has {})",
                    node.messages.len()
                )));
            }
            node.select_index = index;
            next.updated_at = Utc::now();
            Ok(next)
        })
        .await
        .map(|_| ())
    }

    /// Delete one variant together with the tool calls and results that
    /// depend on it.
    pub async fn delete_message(&self, conversation_id: Uuid, message_id: Uuid) -> Result<()> {
        self.inner.tasks.cancel(conversation_id);
        self.mutate(conversation_id, |c| {
            if c.find_message(message_id).is_none() {
                return Err(Error::NotFound(format!("message {message_id}")));
            }
            Ok(delete_cascade(c, message_id))
        })
        .await
        .map(|_| ())
    }

    /// Copy history up to and including the node holding `message_id` into
    /// a new conversation. Local attachment files are duplicated.
    pub async fn fork_at(&self, conversation_id: Uuid, message_id: Uuid) -> Result<Uuid> {
        let source = self.load(conversation_id, None).await?;
        let index = source
            .node_index_of(message_id)
            .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
        let files_dir = self.inner.pipeline.env().files_dir.clone();

        let mut fork = Conversation::new(Uuid::new_v4(), source.assistant_id);
        fork.title = source.title.clone();
        for node in &source.nodes[..=index] {
            let mut messages = Vec::with_capacity(node.messages.len());
            for message in &node.messages {
                messages.push(copy_attachments(&files_dir, message).await?);
            }
            fork.nodes.push(MessageNode {
                id: Uuid::new_v4(),
                messages,
                select_index: node.select_index,
            });
        }
        let fork = fork.normalized();
        self.inner.repository.insert(&fork).await?;
        tracing::info!(
            source = %conversation_id,
            fork = %fork.id,
            nodes = fork.nodes.len(),
            "conversation forked"
        );
        Ok(fork.id)
    }

    /// Exclude everything so far from the context, or undo that if the
    /// conversation is already truncated at its end.
    pub async fn toggle_truncate(&self, conversation_id: Uuid) -> Result<Option<usize>> {
        let updated = self
            .mutate(conversation_id, |c| {
                let len = c.nodes.len();
                let mut next = c.clone();
                next.truncate_index = if c.truncate_index == Some(len) {
                    None
                } else {
                    Some(len)
                };
                Ok(next)
            })
            .await?;
        Ok(updated.truncate_index)
    }

    pub async fn clear_truncate(&self, conversation_id: Uuid) -> Result<()> {
        self.mutate(conversation_id, |c| {
            Ok(Conversation {
                truncate_index: None,
                ..c.clone()
            })
        })
        .await
        .map(|_| ())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Single-shot completions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Replace the whole history with one user message holding a summary.
    /// This cannot be undone.
    pub async fn compress_context(
        &self,
        conversation_id: Uuid,
        additional_context: &str,
        target_tokens: usize,
    ) -> Result<()> {
        let result = self
            .compress(conversation_id, additional_context, target_tokens)
            .await;
        self.report(conversation_id, result)
    }

    async fn compress(
        &self,
        conversation_id: Uuid,
        additional_context: &str,
        target_tokens: usize,
    ) -> Result<()> {
        self.inner.tasks.cancel(conversation_id);
        let conversation = self.load(conversation_id, None).await?;
        let (resolved, assistant) = self.resolve_for(&conversation, ModelRole::Compression)?;
        let content = post::conversation_text(
            &conversation.context_messages(),
            COMPRESSION_CHARS_PER_MESSAGE,
        );
        if content.trim().is_empty() {
            return Ok(());
        }
        let target = target_tokens.to_string();
        let settings = self.inner.settings.snapshot();
        let prompt = post::fill(
            &settings.prompts.compression,
            &[
                ("content", content.as_str()),
                ("target_tokens", target.as_str()),
                ("additional_context", additional_context),
            ],
        );
        let prompt = self.substitute(&conversation, &resolved, assistant.as_ref(), &prompt);
        let cancel = CancellationToken::new();
        let summary = post::complete(&resolved, assistant.as_ref(), prompt, &cancel).await?;

        let removed = conversation.nodes.len();
        let chars = summary.chars().count();
        self.mutate(conversation_id, |c| {
            let mut next = c.clone();
            next.nodes = vec![MessageNode::from_message(Message::user(summary))];
            next.truncate_index = None;
            next.chat_suggestions.clear();
            next.updated_at = Utc::now();
            Ok(next)
        })
        .await?;
        tracing::info!(conversation_id = %conversation_id, removed_nodes = removed, "context compressed");
        TraceEvent::CompressionApplied {
            conversation_id: conversation_id.to_string(),
            removed_nodes: removed,
            summary_chars: chars,
        }
        .emit();
        Ok(())
    }

    /// Translate one message into `target_lang` (the display default when
    /// `None`) and store it alongside the original.
    pub async fn translate_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        target_lang: Option<&str>,
    ) -> Result<()> {
        let result = self
            .translate(conversation_id, message_id, target_lang)
            .await;
        self.report(conversation_id, result)
    }

    async fn translate(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        target_lang: Option<&str>,
    ) -> Result<()> {
        let conversation = self.load(conversation_id, None).await?;
        let message = conversation
            .find_message(message_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
        let (resolved, assistant) = self.resolve_for(&conversation, ModelRole::Translation)?;
        let settings = self.inner.settings.snapshot();
        let target = target_lang.unwrap_or(&settings.display.translate_target);
        let source_text = message.text();
        let prompt = post::fill(
            &settings.prompts.translation,
            &[("source_text", source_text.as_str()), ("target_lang", target)],
        );
        let cancel = CancellationToken::new();
        let translated = post::complete(&resolved, assistant.as_ref(), prompt, &cancel).await?;

        self.mutate(conversation_id, |c| {
            let current = c
                .find_message(message_id)
                .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
            let mut updated = current.clone();
            updated.translation = Some(translated);
            Ok(c.with_message_replaced(&updated))
        })
        .await
        .map(|_| ())
    }

    pub async fn clear_translation(&self, conversation_id: Uuid, message_id: Uuid) -> Result<()> {
        self.mutate(conversation_id, |c| {
            let current = c
                .find_message(message_id)
                .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
            let mut updated = current.clone();
            updated.translation = None;
            Ok(c.with_message_replaced(&updated))
        })
        .await
        .map(|_| ())
    }

    /// Generate a title. Without `force`, a conversation that already has
    /// one is left alone.
    pub async fn generate_title(&self, conversation_id: Uuid, force: bool) -> Result<()> {
        let conversation = self.load(conversation_id, None).await?;
        if !force && !conversation.title.trim().is_empty() {
            return Ok(());
        }
        let settings = self.inner.settings.snapshot();
        let content = recent_text(
            &conversation,
            settings.runtime.title_context_messages,
            settings.runtime.summary_chars_per_message,
        );
        if content.trim().is_empty() {
            return Ok(());
        }
        let (resolved, assistant) = self.resolve_for(&conversation, ModelRole::Title)?;
        let prompt = post::fill(
            &settings.prompts.title,
            &[
                ("locale", settings.display.locale.as_str()),
                ("content", content.as_str()),
            ],
        );
        let prompt = self.substitute(&conversation, &resolved, assistant.as_ref(), &prompt);
        let cancel = CancellationToken::new();
        let title = post::clean_title(
            &post::complete(&resolved, assistant.as_ref(), prompt, &cancel).await?,
        );
        if title.is_empty() {
            return Ok(());
        }
        tracing::debug!(conversation_id = %conversation_id, title = %title, "title generated");
        self.mutate(conversation_id, |c| {
            Ok(Conversation {
                title,
                ..c.clone()
            })
        })
        .await
        .map(|_| ())
    }

    /// Generate follow-up suggestions. Skipped when no suggestion model is
    /// configured.
    pub async fn generate_suggestions(&self, conversation_id: Uuid) -> Result<()> {
        let conversation = self.load(conversation_id, None).await?;
        let settings = self.inner.settings.snapshot();
        let (resolved, assistant) = match self.resolve_for(&conversation, ModelRole::Suggestion) {
            Ok(pair) => pair,
            Err(Error::Config(reason)) => {
                tracing::debug!(reason = %reason, "suggestions skipped");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let content = recent_text(
            &conversation,
            settings.runtime.suggestion_context_messages,
            settings.runtime.summary_chars_per_message,
        );
        if content.trim().is_empty() {
            return Ok(());
        }
        let prompt = post::fill(
            &settings.prompts.suggestion,
            &[
                ("locale", settings.display.locale.as_str()),
                ("content", content.as_str()),
            ],
        );
        let prompt = self.substitute(&conversation, &resolved, assistant.as_ref(), &prompt);
        let cancel = CancellationToken::new();
        let raw = post::complete(&resolved, assistant.as_ref(), prompt, &cancel).await?;
        let suggestions = post::parse_suggestions(&raw, MAX_SUGGESTIONS);
        self.mutate(conversation_id, |c| {
            Ok(Conversation {
                chat_suggestions: suggestions,
                ..c.clone()
            })
        })
        .await
        .map(|_| ())
    }

    fn resolve_for(
        &self,
        conversation: &Conversation,
        role: ModelRole,
    ) -> Result<(ResolvedModel, Option<AssistantSetting>)> {
        let settings = self.inner.settings.snapshot();
        let assistant = settings.find_assistant(conversation.assistant_id).cloned();
        let resolved = self
            .inner
            .registry
            .resolve(&settings, role, assistant.as_ref())?;
        Ok((resolved, assistant))
    }

    fn substitute(
        &self,
        conversation: &Conversation,
        resolved: &ResolvedModel,
        assistant: Option<&AssistantSetting>,
        text: &str,
    ) -> String {
        let settings = self.inner.settings.snapshot();
        let assistant = assistant
            .cloned()
            .unwrap_or_else(|| AssistantSetting::new(""));
        let ctx = TransformContext::new(
            settings,
            assistant,
            resolved.model.clone(),
            conversation.id,
            CancellationToken::new(),
        );
        self.inner.pipeline.env().placeholders.substitute(text, &ctx)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Persistence
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Make sure the conversation is resident and return its snapshot.
    pub(crate) async fn load(
        &self,
        conversation_id: Uuid,
        assistant_id: Option<Uuid>,
    ) -> Result<Conversation> {
        if let Some(c) = self.inner.state.get(conversation_id) {
            return Ok(c);
        }
        let conversation = match self.inner.repository.get(conversation_id).await? {
            Some(c) => c.normalized(),
            None => {
                let settings = self.inner.settings.snapshot();
                let assistant_id = assistant_id
                    .or_else(|| settings.selected_assistant().map(|a| a.id))
                    .ok_or_else(|| Error::Config("no assistant configured".into()))?;
                Conversation::new(conversation_id, assistant_id)
            }
        };
        let slot = self.inner.state.get_or_insert(conversation);
        let snapshot = slot.borrow().clone();
        Ok(snapshot)
    }

    /// Apply `f` to the resident conversation and persist the result.
    async fn mutate<F>(&self, conversation_id: Uuid, f: F) -> Result<Conversation>
    where
        F: FnOnce(&Conversation) -> Result<Conversation>,
    {
        self.load(conversation_id, None).await?;
        let mut outcome = None;
        self.inner.state.modify_if(conversation_id, |c| match f(c) {
            Ok(next) => {
                let next = next.normalized();
                outcome = Some(Ok(next.clone()));
                Some(next)
            }
            Err(e) => {
                outcome = Some(Err(e));
                None
            }
        });
        let conversation = outcome
            .unwrap_or_else(|| Err(Error::NotFound(format!("conversation {conversation_id}"))))?;
        self.persist(&conversation).await?;
        if !self.inner.tasks.is_running(conversation_id) {
            self.schedule_eviction(conversation_id);
        }
        Ok(conversation)
    }

    /// Write through to the repository, flagging oversized conversations.
    pub(crate) async fn persist(&self, conversation: &Conversation) -> Result<()> {
        let limit = self.inner.settings.snapshot().runtime.max_conversation_bytes;
        let bytes = conversation.estimated_size();
        if bytes > limit {
            tracing::warn!(
                conversation_id = %conversation.id,
                bytes,
                limit,
                "conversation exceeds the recommended size"
            );
            TraceEvent::ConversationOversized {
                conversation_id: conversation.id.to_string(),
                bytes,
                limit,
            }
            .emit();
        }
        self.inner.repository.upsert(conversation).await
    }

    /// Record a user-facing failure on the error list and pass the same
    /// variant on to the caller.
    fn report<T>(&self, conversation_id: Uuid, result: Result<T>) -> Result<T> {
        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "command failed");
                let kept = e.duplicate();
                self.inner.errors.error(e, Some(conversation_id));
                Err(kept)
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn recent_text(conversation: &Conversation, count: usize, chars: usize) -> String {
    let messages = conversation.current_messages();
    let start = messages.len().saturating_sub(count);
    post::conversation_text(&messages[start..], chars)
}

/// Remove `message_id` and, transitively, every variant sharing a tool
/// call id with a removed variant.
fn delete_cascade(conversation: &Conversation, message_id: Uuid) -> Conversation {
    let mut doomed: HashSet<Uuid> = HashSet::from([message_id]);
    let mut call_ids: HashSet<String> = HashSet::new();
    loop {
        let before = (doomed.len(), call_ids.len());
        for message in conversation.nodes.iter().flat_map(|n| &n.messages) {
            let ids: Vec<&str> = message
                .tool_call_ids()
                .into_iter()
                .chain(message.tool_result_ids())
                .collect();
            if doomed.contains(&message.id) {
                call_ids.extend(ids.into_iter().map(str::to_owned));
            } else if ids.iter().any(|id| call_ids.contains(*id)) {
                doomed.insert(message.id);
            }
        }
        if (doomed.len(), call_ids.len()) == before {
            break;
        }
    }

    let mut next = conversation.clone();
    for node in &mut next.nodes {
        let selected = node.current_message().map(|m| m.id);
        node.messages.retain(|m| !doomed.contains(&m.id));
        node.select_index = selected
            .and_then(|id| node.messages.iter().position(|m| m.id == id))
            .unwrap_or_else(|| node.messages.len().saturating_sub(1));
    }
    next.updated_at = Utc::now();
    next.normalized()
}

/// Duplicate local attachment files of `message` into `files_dir`.
async fn copy_attachments(files_dir: &Path, message: &Message) -> Result<Message> {
    let mut copies: HashMap<String, String> = HashMap::new();
    for url in message.parts.iter().filter_map(ContentPart::attachment_url) {
        let Some(path) = local_path(url) else { continue };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            continue;
        }
        tokio::fs::create_dir_all(files_dir).await?;
        let name = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        };
        let dest = files_dir.join(name);
        tokio::fs::copy(&path, &dest).await?;
        let dest = tokio::fs::canonicalize(&dest).await.unwrap_or(dest);
        copies.insert(url.to_owned(), format!("file://{}", dest.display()));
    }
    let mut copy = message.map_attachment_urls(|u| copies.get(u).cloned());
    copy.id = Uuid::new_v4();
    Ok(copy)
}

//! One generation run: repair, transform, stream, fold, call tools, repeat.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parley_domain::capability::ModelRole;
use parley_domain::config::AssistantSetting;
use parley_domain::conversation::Conversation;
use parley_domain::error::{Error, Result};
use parley_domain::message::{ContentPart, Message, Role};
use parley_domain::stream::{StreamEvent, Usage};
use parley_domain::tool::ToolCall;
use parley_domain::trace::TraceEvent;
use parley_providers::ChatRequest;
use parley_transformers::TransformContext;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::orchestrator::{ChatService, GenerationPreview};
use crate::repair::{repair_history, RepairReport};
use crate::tools::ToolSet;

/// What to generate for.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GenerationJob {
    pub conversation_id: Uuid,
    /// Node to add a new variant to. The prompt is every node before it.
    /// `None` answers after the last node.
    pub regenerate_node: Option<Uuid>,
    pub proactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Cancelled,
    Failed,
}

impl GenerationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

#[derive(Default)]
struct RunStats {
    steps: usize,
    usage: Option<Usage>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a generation to completion. Never panics and never propagates:
/// failures are recorded on the service's error list, cancellation is
/// reported only through the returned outcome.
pub(crate) async fn run_generation(
    service: &ChatService,
    job: GenerationJob,
    cancel: CancellationToken,
) -> GenerationOutcome {
    let started = Instant::now();
    let cid = job.conversation_id;
    let mut stats = RunStats::default();

    let result = generate(service, job, &cancel, &mut stats).await;
    let outcome = match &result {
        Ok(()) => GenerationOutcome::Completed,
        Err(e) if e.is_cancelled() => GenerationOutcome::Cancelled,
        Err(_) => GenerationOutcome::Failed,
    };
    if let Err(e) = result {
        if !e.is_cancelled() {
            tracing::error!(conversation_id = %cid, error = %e, "generation failed");
            service.errors().error(e, Some(cid));
        }
    }

    // Whatever state was reached stays; close open reasoning and persist it.
    let now = Utc::now();
    if let Some(conversation) = service
        .state()
        .modify_if(cid, |c| close_reasoning(c, now))
        .or_else(|| service.state().get(cid))
    {
        if let Err(e) = service.persist(&conversation).await {
            tracing::warn!(conversation_id = %cid, error = %e, "persisting after generation failed");
        }
    }

    TraceEvent::GenerationFinished {
        conversation_id: cid.to_string(),
        outcome: outcome.as_str().into(),
        steps: stats.steps,
        duration_ms: started.elapsed().as_millis() as u64,
        prompt_tokens: stats.usage.map(|u| u.prompt_tokens),
        completion_tokens: stats.usage.map(|u| u.completion_tokens),
    }
    .emit();
    outcome
}

fn close_reasoning(conversation: &Conversation, at: DateTime<Utc>) -> Option<Conversation> {
    let open = conversation.nodes.iter().flat_map(|n| &n.messages).any(|m| {
        m.parts
            .iter()
            .any(|p| matches!(p, ContentPart::Reasoning { finished_at: None, .. }))
    });
    if !open {
        return None;
    }
    let mut next = conversation.clone();
    for node in &mut next.nodes {
        for message in &mut node.messages {
            *message = message.finish_reasoning(at);
        }
    }
    Some(next)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn generate(
    service: &ChatService,
    job: GenerationJob,
    cancel: &CancellationToken,
    stats: &mut RunStats,
) -> Result<()> {
    let cid = job.conversation_id;
    let settings = service.settings().snapshot();
    let conversation = service.load(cid, None).await?;
    let assistant = settings
        .find_assistant(conversation.assistant_id)
        .cloned()
        .ok_or_else(|| {
            Error::Config(format!("assistant {} does not exist", conversation.assistant_id))
        })?;
    let resolved = service
        .registry()
        .resolve(&settings, ModelRole::Chat, Some(&assistant))?;
    let model = resolved.model.clone();
    let provider = resolved.provider.clone();

    TraceEvent::GenerationStarted {
        conversation_id: cid.to_string(),
        assistant_id: assistant.id.to_string(),
        model: model.label().to_string(),
        proactive: job.proactive,
    }
    .emit();

    let mut report = RepairReport::default();
    let conversation = service
        .state()
        .modify(cid, |c| {
            let cleared = Conversation {
                chat_suggestions: Vec::new(),
                ..c.clone()
            };
            let (fixed, r) = repair_history(&cleared);
            report = r;
            fixed
        })
        .ok_or_else(|| Error::NotFound(format!("conversation {cid}")))?;

    let tools = if assistant.wants_tools() && !model.supports_tools() {
        tracing::warn!(model = %model.label(), "assistant uses tools but the model cannot call them");
        service.errors().warning(
            Error::Capability(format!(
                "{} does not support tool calls; tools are disabled for this reply",
                model.label()
            )),
            Some(cid),
        );
        ToolSet::default()
    } else if assistant.wants_tools() {
        service.tools().tool_set(&settings, &assistant, cancel).await?
    } else {
        ToolSet::default()
    };

    if !report.is_noop() {
        tracing::info!(
            conversation_id = %cid,
            dropped_variants = report.dropped_variants,
            pruned_nodes = report.pruned_nodes,
            "repaired message history"
        );
        TraceEvent::HistoryRepaired {
            conversation_id: cid.to_string(),
            dropped_variants: report.dropped_variants,
            pruned_nodes: report.pruned_nodes,
        }
        .emit();
    }

    let all = conversation.current_messages();
    let base_len = job
        .regenerate_node
        .and_then(|id| conversation.nodes.iter().position(|n| n.id == id))
        .unwrap_or(all.len());
    let prefix = all[..base_len].to_vec();
    let context_start = conversation.truncate_index.unwrap_or(0).min(base_len);

    let mut generated: Vec<Message> = Vec::new();
    let max_steps = assistant.max_tool_steps.max(1);

    for step in 0..max_steps {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        stats.steps = step + 1;

        let ctx = TransformContext::new(
            settings.clone(),
            assistant.clone(),
            model.clone(),
            cid,
            cancel.clone(),
        );
        let history = prompt_window(&assistant, &prefix[context_start..], &generated);
        let input = service.pipeline().transform_input(&ctx, history).await?;

        // The last step offers no tools so the model has to answer.
        let offered = if step + 1 < max_steps {
            tools.definitions()
        } else {
            Vec::new()
        };
        let req = ChatRequest {
            model: model.model_id.clone(),
            messages: input,
            tools: offered,
            temperature: assistant.temperature,
            top_p: assistant.top_p,
            max_tokens: assistant.max_tokens,
        };

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            stream = provider.chat_stream(req) => stream?,
        };

        let mut draft = Draft::new(model.id);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                event = stream.next() => event,
            };
            let Some(event) = event else { break };
            match event? {
                StreamEvent::Error { message } => {
                    return Err(Error::provider(provider.provider_id(), message));
                }
                other => draft.apply(other, Utc::now()),
            }

            let snapshot = draft.snapshot();
            fold(service, cid, cancel, base_len, &generated, Some(&snapshot));
            let visual = service.pipeline().visual_transform(&ctx, vec![snapshot]);
            if let Some(message) = visual.into_iter().next() {
                service.preview(GenerationPreview {
                    conversation_id: cid,
                    message,
                });
            }
        }

        let (message, calls, usage) = draft.finish(Utc::now());
        if let Some(u) = usage {
            stats.usage = Some(stats.usage.map_or(u, |acc| acc.merge(u)));
        }
        let finished = service.pipeline().transform_output(&ctx, vec![message]);
        let finished = service.pipeline().on_generation_finish(&ctx, finished).await;
        generated.extend(finished);
        fold(service, cid, cancel, base_len, &generated, None);

        if calls.is_empty() {
            return Ok(());
        }
        if tools.is_empty() || step + 1 == max_steps {
            tracing::warn!(
                conversation_id = %cid,
                calls = calls.len(),
                "model requested tools that were not offered"
            );
            return Ok(());
        }

        tracing::debug!(conversation_id = %cid, step, calls = calls.len(), "dispatching tool calls");
        let results = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            results = tools.execute_all(&calls) => results,
        };
        let parts = calls
            .iter()
            .zip(results)
            .map(|(call, content)| ContentPart::ToolResult {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                content,
                arguments: call.arguments.clone(),
            })
            .collect();
        generated.push(Message::new(Role::Tool, parts));
        if let Some(conversation) = fold(service, cid, cancel, base_len, &generated, None) {
            service.persist(&conversation).await?;
        }
    }

    Ok(())
}

/// Fold `generated (+ draft)` into the resident conversation from node
/// `base_len` onward. Nodes before it belong to the prompt and are never
/// written, so edits made to them meanwhile survive. A cancelled run stops
/// writing so it cannot clobber what replaced it.
fn fold(
    service: &ChatService,
    cid: Uuid,
    cancel: &CancellationToken,
    base_len: usize,
    generated: &[Message],
    draft: Option<&Message>,
) -> Option<Conversation> {
    service.state().modify_if(cid, |c| {
        if cancel.is_cancelled() {
            return None;
        }
        let mut messages = Vec::with_capacity(generated.len() + 1);
        messages.extend_from_slice(generated);
        messages.extend(draft.cloned());
        Some(c.update_messages_from(base_len, &messages))
    })
}

/// History sent to the model: the assistant's window of recent messages
/// with the system prompt in front.
///
/// The window never opens on a tool result whose call was cut off.
fn prompt_window(
    assistant: &AssistantSetting,
    history: &[Message],
    generated: &[Message],
) -> Vec<Message> {
    let mut messages: Vec<Message> = history.iter().chain(generated).cloned().collect();
    let limit = assistant.context_message_size;
    if limit > 0 && messages.len() > limit {
        let mut start = messages.len() - limit;
        while start > 0 && messages[start].role == Role::Tool {
            start -= 1;
        }
        messages.drain(..start);
    }
    if !assistant.system_prompt.trim().is_empty() {
        messages.insert(0, Message::system(assistant.system_prompt.clone()));
    }
    messages
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The assistant message being streamed.
struct Draft {
    message: Message,
    /// Calls still receiving argument deltas: (call_id, tool_name, args).
    open_calls: Vec<(String, String, String)>,
    calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

impl Draft {
    fn new(model_id: Uuid) -> Self {
        let mut message = Message::new(Role::Assistant, Vec::new());
        message.model_id = Some(model_id);
        Self {
            message,
            open_calls: Vec::new(),
            calls: Vec::new(),
            usage: None,
        }
    }

    fn apply(&mut self, event: StreamEvent, now: DateTime<Utc>) {
        match event {
            StreamEvent::Token { text } => {
                self.message = self.message.finish_reasoning(now);
                match self.message.parts.last_mut() {
                    Some(ContentPart::Text { text: buf }) => buf.push_str(&text),
                    _ => self.message.parts.push(ContentPart::Text { text }),
                }
            }
            StreamEvent::Reasoning { text } => match self.message.parts.last_mut() {
                Some(ContentPart::Reasoning {
                    reasoning,
                    finished_at: None,
                    ..
                }) => reasoning.push_str(&text),
                _ => self.message.parts.push(ContentPart::Reasoning {
                    reasoning: text,
                    created_at: now,
                    finished_at: None,
                }),
            },
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                self.open_calls.push((call_id, tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, _, args)) = self.open_calls.iter_mut().find(|c| c.0 == call_id) {
                    args.push_str(&delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                self.open_calls.retain(|c| c.0 != call_id);
                self.calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            StreamEvent::Done { usage, .. } => {
                self.usage = usage;
            }
            StreamEvent::Error { .. } => {}
        }
    }

    /// The message as it should be displayed right now.
    fn snapshot(&self) -> Message {
        let mut message = self.message.clone();
        message.parts.extend(self.calls.iter().map(call_part));
        message.parts.extend(self.open_calls.iter().map(|(id, name, args)| {
            ContentPart::ToolCall {
                call_id: id.clone(),
                tool_name: name.clone(),
                arguments: args.clone(),
            }
        }));
        message
    }

    /// Close the message. Calls that never received a finished event are
    /// parsed from their accumulated deltas.
    fn finish(mut self, now: DateTime<Utc>) -> (Message, Vec<ToolCall>, Option<Usage>) {
        for (call_id, tool_name, args) in self.open_calls.drain(..) {
            let arguments = if args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                match serde_json::from_str(&args) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            call_id = %call_id,
                            tool = %tool_name,
                            error = %e,
                            "tool call arguments are not valid JSON; defaulting to empty object"
                        );
                        Value::Object(Default::default())
                    }
                }
            };
            self.calls.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }
        let mut message = self.message.finish_reasoning(now);
        message.parts.extend(self.calls.iter().map(call_part));
        message.finished_at = Some(now);
        message.usage = self.usage;
        (message, self.calls, self.usage)
    }
}

fn call_part(call: &ToolCall) -> ContentPart {
    ContentPart::ToolCall {
        call_id: call.call_id.clone(),
        tool_name: call.tool_name.clone(),
        arguments: call.arguments.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::Reasoning { text: "think".into() },
            StreamEvent::Reasoning { text: "ing".into() },
            StreamEvent::Token { text: "Hel".into() },
            StreamEvent::Token { text: "lo".into() },
            StreamEvent::ToolCallStarted {
                call_id: "a".into(),
                tool_name: "search_web".into(),
            },
            StreamEvent::ToolCallDelta {
                call_id: "a".into(),
                delta: "{\"query\":".into(),
            },
            StreamEvent::ToolCallDelta {
                call_id: "a".into(),
                delta: "\"rust\"}".into(),
            },
            StreamEvent::ToolCallStarted {
                call_id: "b".into(),
                tool_name: "clock".into(),
            },
            StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                finish_reason: Some("tool_calls".into()),
            },
        ]
    }

    #[test]
    fn draft_assembles_text_reasoning_and_calls() {
        let mut draft = Draft::new(Uuid::new_v4());
        let now = Utc::now();
        for e in events() {
            draft.apply(e, now);
        }
        let (message, calls, usage) = draft.finish(now);

        assert_eq!(message.text(), "Hello");
        match &message.parts[0] {
            ContentPart::Reasoning {
                reasoning,
                finished_at,
                ..
            } => {
                assert_eq!(reasoning, "thinking");
                assert!(finished_at.is_some());
            }
            other => panic!("expected reasoning, got {other:?}"),
        }
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments, json!({"query": "rust"}));
        assert_eq!(calls[1].arguments, json!({}));
        assert_eq!(message.tool_call_ids(), vec!["a", "b"]);
        assert_eq!(usage.unwrap().total_tokens, 15);
        assert!(message.finished_at.is_some());
    }

    #[test]
    fn snapshot_shows_partial_calls() {
        let mut draft = Draft::new(Uuid::new_v4());
        let now = Utc::now();
        draft.apply(
            StreamEvent::ToolCallStarted {
                call_id: "a".into(),
                tool_name: "search_web".into(),
            },
            now,
        );
        draft.apply(
            StreamEvent::ToolCallDelta {
                call_id: "a".into(),
                delta: "{\"qu".into(),
            },
            now,
        );
        let snap = draft.snapshot();
        assert!(snap.has_tool_calls());
        assert!(snap.finished_at.is_none());
    }

    #[test]
    fn prompt_window_keeps_call_with_its_result() {
        let mut assistant = AssistantSetting::new("Ada");
        assistant.context_message_size = 2;
        assistant.system_prompt = "be brief".into();
        let call = Message::new(
            Role::Assistant,
            vec![ContentPart::ToolCall {
                call_id: "a".into(),
                tool_name: "t".into(),
                arguments: "{}".into(),
            }],
        );
        let result = Message::new(
            Role::Tool,
            vec![ContentPart::ToolResult {
                call_id: "a".into(),
                tool_name: "t".into(),
                content: json!("ok"),
                arguments: json!({}),
            }],
        );
        let history = vec![Message::user("q"), call, result, Message::assistant("done")];
        let window = prompt_window(&assistant, &history[..3], &history[3..]);
        let roles: Vec<_> = window.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::Assistant, Role::Tool, Role::Assistant]
        );
    }

    #[test]
    fn close_reasoning_only_touches_open_spans() {
        let c = Conversation::new(Uuid::new_v4(), Uuid::new_v4())
            .with_appended(Message::assistant("done"));
        assert!(close_reasoning(&c, Utc::now()).is_none());
    }
}

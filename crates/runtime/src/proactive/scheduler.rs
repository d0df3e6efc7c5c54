//! Proactive scheduler: fires assistant-initiated messages once the user
//! has been idle long enough.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use parley_domain::config::{AssistantSetting, ProactiveConversationMode, Settings};
use parley_domain::error::Result;
use parley_domain::trace::TraceEvent;
use parley_store::{ConversationRepository, SettingsStore};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::hooks::{ProactiveHooks, ProactiveNotice};
use super::timing::{idle_start, next_trigger};
use crate::orchestrator::ChatService;

/// A fired trigger waiting for its generation to finish.
#[derive(Debug, Clone)]
pub struct PendingProactiveTrigger {
    pub assistant_id: Uuid,
    pub assistant_name: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

/// Process-wide activity timestamps the idle clock is computed from.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleSignals {
    pub last_user_message_at: Option<DateTime<Utc>>,
    pub last_conversation_done_at: Option<DateTime<Utc>>,
    pub last_app_backgrounded_at: Option<DateTime<Utc>>,
}

impl IdleSignals {
    pub fn from_store(store: &SettingsStore) -> Self {
        Self {
            last_user_message_at: store.last_user_message_at(),
            last_conversation_done_at: store.last_conversation_done_at(),
            last_app_backgrounded_at: store.last_app_backgrounded_at(),
        }
    }
}

/// Next eligible fire time for one assistant, `None` while not idle.
pub fn plan_assistant(
    settings: &Settings,
    assistant: &AssistantSetting,
    signals: &IdleSignals,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let proactive = &assistant.proactive;
    let grace = seconds(settings.proactive.grace_period_secs);
    let minutes = proactive
        .interval_minutes
        .max(settings.proactive.min_interval_minutes);
    let idle = idle_start(
        signals.last_conversation_done_at,
        signals.last_app_backgrounded_at,
        signals.last_user_message_at,
        grace,
    );
    next_trigger(
        proactive.last_triggered_at,
        idle,
        Duration::minutes(i64::from(minutes)),
        now,
        proactive.quiet_hours.as_ref().and_then(|q| q.parse()),
        settings.proactive.tz(),
    )
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::from(u32::try_from(secs).unwrap_or(u32::MAX)))
}

fn is_eligible(assistant: &AssistantSetting) -> bool {
    assistant.proactive.enabled && !assistant.proactive.prompt.trim().is_empty()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProactiveScheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProactiveScheduler {
    chat: ChatService,
    hooks: Arc<dyn ProactiveHooks>,
    /// Assistants with a fire in progress.
    firing: DashSet<Uuid>,
    /// Keyed by conversation id.
    pending: DashMap<Uuid, PendingProactiveTrigger>,
}

impl ProactiveScheduler {
    pub fn new(chat: ChatService, hooks: Arc<dyn ProactiveHooks>) -> Arc<Self> {
        Arc::new(Self {
            chat,
            hooks,
            firing: DashSet::new(),
            pending: DashMap::new(),
        })
    }

    pub fn pending(&self, conversation_id: Uuid) -> Option<PendingProactiveTrigger> {
        self.pending.get(&conversation_id).map(|p| p.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Evaluate every enabled assistant and spawn a fire for each one that
    /// is due. Returns the spawned fires.
    pub fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let settings = self.chat.settings().snapshot();
        self.expire_pending(now, &settings);

        let signals = IdleSignals::from_store(self.chat.settings());
        let mut fires = Vec::new();
        for assistant in settings.assistants.iter().filter(|a| is_eligible(a)) {
            let Some(next) = plan_assistant(&settings, assistant, &signals, now) else {
                continue;
            };
            if now < next {
                continue;
            }
            if !self.firing.insert(assistant.id) {
                tracing::debug!(assistant_id = %assistant.id, "proactive fire already in progress");
                continue;
            }
            let scheduler = self.clone();
            let assistant_id = assistant.id;
            fires.push(tokio::spawn(async move {
                if let Err(e) = scheduler.fire(assistant_id, now).await {
                    tracing::warn!(assistant_id = %assistant_id, error = %e, "proactive fire failed");
                }
                scheduler.firing.remove(&assistant_id);
            }));
        }
        fires
    }

    /// Send the assistant's prompt. Returns the target conversation, or
    /// `None` when it was skipped.
    async fn fire(&self, assistant_id: Uuid, now: DateTime<Utc>) -> Result<Option<Uuid>> {
        // Recorded first so the next tick does not fire again while this
        // generation runs.
        let settings = self.chat.settings().update(|s| {
            if let Some(a) = s.find_assistant_mut(assistant_id) {
                a.proactive.last_triggered_at = Some(now);
            }
        });
        let Some(assistant) = settings.find_assistant(assistant_id) else {
            return Ok(None);
        };

        let conversation_id = match assistant.proactive.conversation_mode {
            ProactiveConversationMode::NewConversation => Uuid::new_v4(),
            ProactiveConversationMode::ReuseLatest => self
                .chat
                .repository()
                .latest_for_assistant(assistant_id)
                .await?
                .map(|c| c.id)
                .unwrap_or_else(Uuid::new_v4),
        };
        if self.chat.is_generating(conversation_id) {
            tracing::debug!(
                assistant_id = %assistant_id,
                conversation_id = %conversation_id,
                "conversation busy, proactive fire skipped"
            );
            return Ok(None);
        }

        self.pending.insert(
            conversation_id,
            PendingProactiveTrigger {
                assistant_id,
                assistant_name: assistant.name.clone(),
                prompt: assistant.proactive.prompt.clone(),
                created_at: now,
            },
        );
        if let Err(e) = self
            .chat
            .send_proactive_message(conversation_id, assistant_id, &assistant.proactive.prompt)
            .await
        {
            self.pending.remove(&conversation_id);
            return Err(e);
        }

        tracing::info!(
            assistant_id = %assistant_id,
            conversation_id = %conversation_id,
            "proactive message sent"
        );
        TraceEvent::ProactiveFired {
            assistant_id: assistant_id.to_string(),
            conversation_id: conversation_id.to_string(),
        }
        .emit();
        Ok(Some(conversation_id))
    }

    /// Resolve the pending trigger for a finished conversation, if any.
    pub async fn on_generation_done(&self, conversation_id: Uuid) {
        let Some((_, trigger)) = self.pending.remove(&conversation_id) else {
            return;
        };
        let reply = match self.chat.conversation(conversation_id) {
            Some(c) => c.last_assistant_text(),
            None => match self.chat.repository().get(conversation_id).await {
                Ok(c) => c.and_then(|c| c.last_assistant_text()),
                Err(e) => {
                    tracing::warn!(conversation_id = %conversation_id, error = %e, "loading proactive reply failed");
                    None
                }
            },
        };
        let text = reply.unwrap_or_else(|| trigger.prompt.clone());
        self.hooks
            .notify(ProactiveNotice::new(
                trigger.assistant_id,
                &trigger.assistant_name,
                conversation_id,
                &text,
            ))
            .await;

        let opened = self.chat.settings().is_app_foreground();
        if opened {
            self.hooks.open_conversation(conversation_id).await;
        }
        TraceEvent::ProactiveCompleted {
            assistant_id: trigger.assistant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            opened,
        }
        .emit();
    }

    /// Drop pending triggers older than the configured TTL without
    /// surfacing anything.
    fn expire_pending(&self, now: DateTime<Utc>, settings: &Settings) {
        let ttl = seconds(settings.proactive.pending_ttl_secs);
        let mut expired = Vec::new();
        self.pending.retain(|conversation_id, trigger| {
            let keep = now - trigger.created_at < ttl;
            if !keep {
                expired.push((*conversation_id, trigger.assistant_id));
            }
            keep
        });
        for (conversation_id, assistant_id) in expired {
            tracing::debug!(conversation_id = %conversation_id, "pending proactive trigger expired");
            TraceEvent::ProactiveExpired {
                assistant_id: assistant_id.to_string(),
                conversation_id: conversation_id.to_string(),
            }
            .emit();
        }
    }

    /// Forward generation-done signals to [`ProactiveScheduler::on_generation_done`].
    pub fn spawn_completion_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut done = self.chat.subscribe_generation_done();
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                match done.recv().await {
                    Ok(conversation_id) => scheduler.on_generation_done(conversation_id).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "proactive listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

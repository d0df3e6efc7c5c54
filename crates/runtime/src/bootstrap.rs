//! Runtime construction and background-task spawning.
//!
//! Hosts call [`build_runtime`] with their providers, repository and tool
//! sources, then [`spawn_background_tasks`] once a tokio runtime is up.

use std::sync::Arc;
use std::time::Duration;

use parley_domain::config::{ConfigSeverity, Settings};
use parley_providers::ProviderRegistry;
use parley_store::{ConversationRepository, SettingsStore};

use crate::orchestrator::ChatService;
use crate::proactive::{ProactiveHooks, ProactiveScheduler};
use crate::tools::ToolRegistry;

/// Everything a host needs to drive conversations.
#[derive(Clone)]
pub struct Runtime {
    pub settings: Arc<SettingsStore>,
    pub chat: ChatService,
    pub scheduler: Arc<ProactiveScheduler>,
}

/// Validate settings and wire the services together.
pub fn build_runtime(
    settings: Settings,
    registry: ProviderRegistry,
    repository: Arc<dyn ConversationRepository>,
    tools: ToolRegistry,
    hooks: Arc<dyn ProactiveHooks>,
) -> anyhow::Result<Runtime> {
    // ── Settings validation ──────────────────────────────────────────
    let issues = settings.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Services ─────────────────────────────────────────────────────
    let settings = Arc::new(SettingsStore::new(settings));
    tracing::info!(providers = registry.len(), "LLM provider registry ready");

    let chat = ChatService::builder(settings.clone(), repository, Arc::new(registry))
        .tools(tools)
        .build();
    tracing::info!("chat service ready");

    let scheduler = ProactiveScheduler::new(chat.clone(), hooks);
    let enabled = settings
        .snapshot()
        .assistants
        .iter()
        .filter(|a| a.proactive.enabled)
        .count();
    tracing::info!(enabled_assistants = enabled, "proactive scheduler ready");

    Ok(Runtime {
        settings,
        chat,
        scheduler,
    })
}

/// Spawn the proactive loop and its completion listener.
pub fn spawn_background_tasks(runtime: &Runtime) {
    // ── Proactive completion listener ────────────────────────────────
    runtime.scheduler.spawn_completion_listener();

    // ── Proactive scheduler tick ─────────────────────────────────────
    {
        let scheduler = runtime.scheduler.clone();
        let tick = runtime.settings.snapshot().proactive.tick_secs.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(tick));
            loop {
                interval.tick().await;
                scheduler.tick(chrono::Utc::now());
            }
        });
    }
    tracing::info!("background tasks spawned");
}

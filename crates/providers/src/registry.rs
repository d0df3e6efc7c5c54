//! Provider registry.
//!
//! Holds the host-supplied client for each configured provider. Settings
//! only describe providers and their models; the registry is where a
//! settings-level model id becomes something that can be called.

use std::collections::HashMap;
use std::sync::Arc;

use parley_domain::capability::ModelRole;
use parley_domain::config::{AssistantSetting, ModelSetting, ProviderSetting, Settings};
use parley_domain::error::{Error, Result};
use uuid::Uuid;

use crate::traits::LlmProvider;

/// A configured model paired with the client that serves it.
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider: Arc<dyn LlmProvider>,
    pub provider_setting: ProviderSetting,
    pub model: ModelSetting,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("provider", &self.provider.provider_id())
            .field("model", &self.model.model_id)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<Uuid, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the client for the provider setting `provider_id`,
    /// replacing any earlier registration.
    pub fn register(&mut self, provider_id: Uuid, provider: Arc<dyn LlmProvider>) {
        tracing::info!(
            provider_id = %provider_id,
            client = provider.provider_id(),
            "registered LLM provider"
        );
        self.providers.insert(provider_id, provider);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, provider_id: Uuid, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(provider_id, provider);
        self
    }

    /// Look up a provider by its settings id.
    pub fn get(&self, provider_id: Uuid) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(&provider_id).cloned()
    }

    /// Resolve a specific model id.
    pub fn resolve_model(&self, settings: &Settings, model_id: Uuid) -> Result<ResolvedModel> {
        let (provider_setting, model) = settings
            .find_model(model_id)
            .ok_or_else(|| Error::Config(format!("model {model_id} is not configured")))?;
        self.pair(provider_setting, model)
    }

    /// Resolve the model configured for `role`, honouring the assistant
    /// override and the chat fallback of auxiliary roles.
    pub fn resolve(
        &self,
        settings: &Settings,
        role: ModelRole,
        assistant: Option<&AssistantSetting>,
    ) -> Result<ResolvedModel> {
        let (provider_setting, model) = settings
            .model_for_role(role, assistant)
            .ok_or_else(|| Error::Config(format!("no {role:?} model configured")))?;
        self.pair(provider_setting, model)
    }

    fn pair(&self, provider_setting: &ProviderSetting, model: &ModelSetting) -> Result<ResolvedModel> {
        let provider = self.get(provider_setting.id).ok_or_else(|| {
            Error::Config(format!(
                "provider \"{}\" ({}) has no registered client",
                provider_setting.name, provider_setting.id
            ))
        })?;
        Ok(ResolvedModel {
            provider,
            provider_setting: provider_setting.clone(),
            model: model.clone(),
        })
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// List all registered provider IDs (sorted).
    pub fn list_providers(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.providers.keys().copied().collect();
        ids.sort();
        ids
    }
}

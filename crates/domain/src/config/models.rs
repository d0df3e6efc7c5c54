use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::{Modality, ModelAbility, ModelType};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers and models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A configured provider account. The actual client is supplied by the
/// host and registered under the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSetting {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub models: Vec<ModelSetting>,
}

/// One model offered by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSetting {
    /// Settings-level identifier referenced by `chat_model_id` and friends.
    pub id: Uuid,
    /// Wire-level model name, e.g. `"gpt-4o-mini"`.
    pub model_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub model_type: ModelType,
    #[serde(default = "d_text_only")]
    pub input_modalities: Vec<Modality>,
    #[serde(default)]
    pub abilities: Vec<ModelAbility>,
}

impl ModelSetting {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id: model_id.into(),
            display_name: String::new(),
            model_type: ModelType::Chat,
            input_modalities: d_text_only(),
            abilities: Vec::new(),
        }
    }

    pub fn supports_images(&self) -> bool {
        self.input_modalities.contains(&Modality::Image)
    }

    pub fn supports_tools(&self) -> bool {
        self.abilities.contains(&ModelAbility::Tool)
    }

    pub fn supports_reasoning(&self) -> bool {
        self.abilities.contains(&ModelAbility::Reasoning)
    }

    /// Name shown to users and substituted for `{{model_name}}`.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.model_id
        } else {
            &self.display_name
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}

fn d_text_only() -> Vec<Modality> {
    vec![Modality::Text]
}

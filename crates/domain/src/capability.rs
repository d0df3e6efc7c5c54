use serde::{Deserialize, Serialize};

/// Input kinds a model can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
}

/// Optional abilities advertised per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelAbility {
    /// Function / tool calling.
    Tool,
    /// Native reasoning output.
    Reasoning,
}

/// What a configured model is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    Chat,
    Embedding,
}

/// Model roles. Each maps to a dedicated model slot in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Chat,
    Title,
    Suggestion,
    Translation,
    Ocr,
    Compression,
}

impl ModelRole {
    /// Roles that use the chat model when their own slot is empty.
    pub fn falls_back_to_chat(self) -> bool {
        matches!(
            self,
            Self::Title | Self::Translation | Self::Compression
        )
    }
}

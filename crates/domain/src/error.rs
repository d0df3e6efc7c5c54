/// Shared error type used across all parley crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// No usable model/provider, or a setting points at something missing.
    #[error("config: {0}")]
    Config(String),

    /// The selected model cannot do what the request asks for.
    #[error("capability: {0}")]
    Capability(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Cancellation is a normal outcome, never a reportable failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// A copy for a second owner. The variant and its fields carry over;
    /// IO errors keep their kind and message, JSON errors only their message.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Json(e) => Self::Other(format!("JSON: {e}")),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Capability(m) => Self::Capability(m.clone()),
            Self::Provider { provider, message } => Self::provider(provider, message),
            Self::Tool { tool, message } => Self::tool(tool, message),
            Self::Persistence(m) => Self::Persistence(m.clone()),
            Self::NotFound(m) => Self::NotFound(m.clone()),
            Self::Cancelled => Self::Cancelled,
            Self::Other(m) => Self::Other(m.clone()),
        }
    }
}


pub type Result<T> = std::result::Result<T, Error>;

pub mod registry;
pub mod traits;

// Re-exports for convenience.
pub use registry::{ProviderRegistry, ResolvedModel};
pub use traits::{ChatRequest, ChatResponse, LlmProvider};

//! Conversation runtime: the generation orchestrator, tool dispatch,
//! post-processing completions and the proactive scheduler.

pub mod bootstrap;
pub mod cli;
pub mod errors;
pub mod generation;
pub mod orchestrator;
pub mod post;
pub mod proactive;
pub mod repair;
pub mod state_store;
pub mod tasks;
pub mod tools;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bootstrap::{build_runtime, spawn_background_tasks, Runtime};
pub use errors::{ChatError, ChatErrorList, ChatErrorSeverity};
pub use generation::GenerationOutcome;
pub use orchestrator::{ChatService, ChatServiceBuilder, GenerationPreview};
pub use proactive::{ProactiveHooks, ProactiveNotice, ProactiveScheduler};
pub use tools::{McpToolSource, SearchService, Tool, ToolRegistry, ToolSet};

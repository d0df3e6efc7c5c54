//! Message transformer pipeline.
//!
//! Input stages rewrite history before it reaches a model; output stages
//! rewrite what comes back. Stages are plain enum values run in order by
//! [`Pipeline`].

pub mod base64_image;
pub mod context;
pub mod document;
pub mod injection;
pub mod ocr;
pub mod pipeline;
pub mod placeholder;
pub mod regex_rule;
pub mod template;
pub mod think_tag;

#[cfg(test)]
mod testing;

pub use context::TransformContext;
pub use document::{DocumentReader, PlainTextReader};
pub use injection::find_safe_insert_index;
pub use ocr::OcrCache;
pub use pipeline::{InputStage, OutputStage, Pipeline, StageEnv};
pub use placeholder::PlaceholderRegistry;

//! Ordered stage lists and the folds that run them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parley_domain::config::RuntimeSettings;
use parley_domain::error::Result;
use parley_domain::message::Message;
use parley_providers::ProviderRegistry;

use crate::context::TransformContext;
use crate::document::{self, DocumentReader, PlainTextReader};
use crate::ocr::{self, OcrCache};
use crate::placeholder::PlaceholderRegistry;
use crate::{base64_image, injection, regex_rule, template, think_tag};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stages run on history before it is sent to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStage {
    Placeholder,
    Document,
    Ocr,
    PromptInjection,
    Template,
}

impl InputStage {
    /// Default order, without [`InputStage::Template`] which the pipeline
    /// always appends itself.
    pub const DEFAULT: [InputStage; 4] = [
        InputStage::Placeholder,
        InputStage::Document,
        InputStage::Ocr,
        InputStage::PromptInjection,
    ];

    pub async fn transform(
        self,
        env: &StageEnv,
        ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>> {
        match self {
            Self::Placeholder => Ok(env.placeholders.apply(ctx, messages)),
            Self::Document => document::apply(env.documents.as_ref(), ctx, messages).await,
            Self::Ocr => ocr::apply(&env.registry, &env.ocr_cache, ctx, messages).await,
            Self::PromptInjection => Ok(injection::apply(&ctx.settings, &ctx.assistant, messages)),
            Self::Template => Ok(template::apply(ctx, messages)),
        }
    }
}

/// Stages run on model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStage {
    ThinkTag,
    Base64Image,
    Regex,
}

impl OutputStage {
    pub const DEFAULT: [OutputStage; 3] = [
        OutputStage::ThinkTag,
        OutputStage::Base64Image,
        OutputStage::Regex,
    ];

    /// Durable rewrite of a finished step's messages.
    pub fn transform(self, ctx: &TransformContext, messages: Vec<Message>) -> Vec<Message> {
        match self {
            Self::ThinkTag => think_tag::apply(messages),
            Self::Base64Image => messages,
            Self::Regex => regex_rule::apply(&ctx.assistant.regexes, false, messages),
        }
    }

    /// Display-only rewrite of possibly incomplete content.
    pub fn visual_transform(self, ctx: &TransformContext, messages: Vec<Message>) -> Vec<Message> {
        match self {
            Self::ThinkTag => think_tag::apply(messages),
            Self::Base64Image => messages,
            Self::Regex => regex_rule::apply(&ctx.assistant.regexes, true, messages),
        }
    }

    /// Side effects once generation is over.
    pub async fn on_generation_finish(
        self,
        env: &StageEnv,
        _ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Vec<Message> {
        match self {
            Self::Base64Image => base64_image::on_generation_finish(&env.files_dir, messages).await,
            Self::ThinkTag | Self::Regex => messages,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared stage environment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Long-lived collaborators the stages call into. Owned by the
/// orchestrator and shared by every generation it runs.
pub struct StageEnv {
    pub registry: Arc<ProviderRegistry>,
    pub placeholders: PlaceholderRegistry,
    pub documents: Arc<dyn DocumentReader>,
    pub ocr_cache: OcrCache,
    pub files_dir: PathBuf,
}

impl StageEnv {
    pub fn new(registry: Arc<ProviderRegistry>, runtime: &RuntimeSettings) -> Self {
        Self {
            registry,
            placeholders: PlaceholderRegistry::with_defaults(),
            documents: Arc::new(PlainTextReader),
            ocr_cache: OcrCache::new(
                runtime.ocr_cache_capacity,
                Duration::from_secs(runtime.ocr_cache_ttl_secs),
            ),
            files_dir: runtime.files_dir.clone(),
        }
    }

    pub fn with_document_reader(mut self, reader: Arc<dyn DocumentReader>) -> Self {
        self.documents = reader;
        self
    }

    pub fn with_placeholders(mut self, placeholders: PlaceholderRegistry) -> Self {
        self.placeholders = placeholders;
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Pipeline {
    env: StageEnv,
    input: Vec<InputStage>,
    output: Vec<OutputStage>,
}

impl Pipeline {
    pub fn new(env: StageEnv) -> Self {
        Self {
            env,
            input: InputStage::DEFAULT.to_vec(),
            output: OutputStage::DEFAULT.to_vec(),
        }
    }

    /// Replace the input chain. A `Template` entry is dropped; it always
    /// runs last.
    pub fn with_input_stages(mut self, stages: Vec<InputStage>) -> Self {
        self.input = stages
            .into_iter()
            .filter(|s| *s != InputStage::Template)
            .collect();
        self
    }

    pub fn with_output_stages(mut self, stages: Vec<OutputStage>) -> Self {
        self.output = stages;
        self
    }

    pub fn env(&self) -> &StageEnv {
        &self.env
    }

    pub fn input_stages(&self) -> impl Iterator<Item = InputStage> + '_ {
        self.input
            .iter()
            .copied()
            .chain(std::iter::once(InputStage::Template))
    }

    pub async fn transform_input(
        &self,
        ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>> {
        let mut messages = messages;
        for stage in self.input_stages() {
            ctx.check_cancelled()?;
            messages = stage.transform(&self.env, ctx, messages).await?;
        }
        Ok(messages)
    }

    pub fn transform_output(&self, ctx: &TransformContext, messages: Vec<Message>) -> Vec<Message> {
        self.output
            .iter()
            .fold(messages, |acc, stage| stage.transform(ctx, acc))
    }

    pub fn visual_transform(&self, ctx: &TransformContext, messages: Vec<Message>) -> Vec<Message> {
        self.output
            .iter()
            .fold(messages, |acc, stage| stage.visual_transform(ctx, acc))
    }

    pub async fn on_generation_finish(
        &self,
        ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Vec<Message> {
        let mut messages = messages;
        for stage in &self.output {
            messages = stage.on_generation_finish(&self.env, ctx, messages).await;
        }
        messages
    }
}

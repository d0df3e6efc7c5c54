use std::sync::Arc;

use parley_domain::config::{AssistantSetting, ModelSetting, RuntimeSettings, Settings};
use parley_domain::error::Result;
use parley_domain::message::{ContentPart, Message, Role};
use parley_providers::ProviderRegistry;
use parley_transformers::{DocumentReader, Pipeline, StageEnv, TransformContext};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn pipeline(dir: &tempfile::TempDir) -> Pipeline {
    let runtime = RuntimeSettings {
        files_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    Pipeline::new(StageEnv::new(Arc::new(ProviderRegistry::new()), &runtime))
}

fn context(template: &str) -> TransformContext {
    let mut settings = Settings::default();
    settings.display.nickname = "Sam".into();
    let mut assistant = AssistantSetting::new("Ada");
    assistant.message_template = template.into();
    TransformContext::new(
        Arc::new(settings),
        assistant,
        ModelSetting::new("text-only-model"),
        Uuid::new_v4(),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn placeholders_resolve_before_the_template_wraps_user_text() {
    let dir = tempfile::tempdir().unwrap();
    let out = pipeline(&dir)
        .transform_input(&context("<{{ message }}>"), vec![Message::user("hi {{nickname}}")])
        .await
        .unwrap();

    let user = out.iter().find(|m| m.role == Role::User).unwrap();
    assert_eq!(user.text(), "<hi Sam>");
}

/// Stands in for a host-side parser of binary formats.
struct SlideReader;

#[async_trait::async_trait]
impl DocumentReader for SlideReader {
    async fn read(&self, _url: &str, file_name: &str, _mime: &str) -> Result<String> {
        Ok(format!("parsed {file_name}"))
    }
}

#[tokio::test]
async fn custom_document_reader_replaces_the_plain_text_one() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = RuntimeSettings {
        files_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let env = StageEnv::new(Arc::new(ProviderRegistry::new()), &runtime)
        .with_document_reader(Arc::new(SlideReader));
    let message = Message::new(
        Role::User,
        vec![
            ContentPart::text("summarize"),
            ContentPart::Document {
                url: "file:///decks/q3.pptx".into(),
                file_name: "q3.pptx".into(),
                mime: "application/vnd.ms-powerpoint".into(),
            },
        ],
    );

    let out = Pipeline::new(env)
        .transform_input(&context("{{ message }}"), vec![message])
        .await
        .unwrap();
    let user = out.iter().find(|m| m.role == Role::User).unwrap();
    assert!(user.text().contains("parsed q3.pptx"));
    assert!(!user.text().contains("unable to read file"));
}

#[tokio::test]
async fn cancelled_context_stops_the_input_chain() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context("{{ message }}");
    ctx.cancel.cancel();

    let err = pipeline(&dir)
        .transform_input(&ctx, vec![Message::user("hello")])
        .await
        .unwrap_err();
    assert!(matches!(err, parley_domain::error::Error::Cancelled));
}

#[test]
fn think_prefix_becomes_a_reasoning_part() {
    let dir = tempfile::tempdir().unwrap();
    let out = pipeline(&dir).transform_output(
        &context("{{ message }}"),
        vec![Message::assistant("<think>plan it</think>\n\nThe answer.")],
    );

    let reply = &out[0];
    assert_eq!(reply.text(), "The answer.");
    let reasoning = reply.parts.iter().find_map(|p| match p {
        ContentPart::Reasoning {
            reasoning,
            finished_at,
            ..
        } => Some((reasoning.clone(), finished_at.is_some())),
        _ => None,
    });
    assert_eq!(reasoning, Some(("plan it".to_string(), true)));
}

#[test]
fn unclosed_think_block_stays_open_in_the_visual_pass() {
    let dir = tempfile::tempdir().unwrap();
    let out = pipeline(&dir).visual_transform(
        &context("{{ message }}"),
        vec![Message::assistant("<think>still going")],
    );

    let open = out[0].parts.iter().any(|p| {
        matches!(
            p,
            ContentPart::Reasoning {
                finished_at: None,
                ..
            }
        )
    });
    assert!(open);
    assert_eq!(out[0].text(), "");
}

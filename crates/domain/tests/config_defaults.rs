use parley_domain::capability::ModelRole;
use parley_domain::config::{
    AssistantSetting, ConfigSeverity, ModelSetting, ProviderSetting, QuietHours, Settings,
};
use uuid::Uuid;

fn with_chat_model() -> (Settings, Uuid) {
    let model = ModelSetting::new("gpt-4o-mini");
    let id = model.id;
    let settings = Settings {
        chat_model_id: Some(id),
        providers: vec![ProviderSetting {
            id: Uuid::new_v4(),
            name: "openai".into(),
            enabled: true,
            models: vec![model],
        }],
        ..Settings::default()
    };
    (settings, id)
}

#[test]
fn proactive_defaults() {
    let settings = Settings::default();
    assert_eq!(settings.proactive.tick_secs, 30);
    assert_eq!(settings.proactive.pending_ttl_secs, 7200);
    assert_eq!(settings.proactive.timezone, "UTC");
}

#[test]
fn runtime_defaults() {
    let settings = Settings::default();
    assert_eq!(settings.runtime.eviction_delay_ms, 500);
    assert_eq!(settings.runtime.ocr_cache_capacity, 100);
}

#[test]
fn assistant_section_parses_with_defaults() {
    let toml_str = r#"
[[assistants]]
id = "6f1c7c1e-4c7f-4a57-9d7a-2d0f3f1b7a10"
name = "Ada"

[assistants.proactive]
enabled = true
prompt = "Check in on me"
quiet_hours = { start = "22:00", end = "06:00" }
"#;
    let settings: Settings = toml::from_str(toml_str).unwrap();
    let a = &settings.assistants[0];
    assert_eq!(a.name, "Ada");
    assert_eq!(a.max_tool_steps, 25);
    assert_eq!(a.message_template, "{{ message }}");
    assert_eq!(a.proactive.interval_minutes, 60);
    assert_eq!(
        a.proactive.quiet_hours,
        Some(QuietHours::new("22:00", "06:00"))
    );
}

#[test]
fn default_settings_only_warn() {
    let issues = Settings::default().validate();
    assert!(issues
        .iter()
        .all(|i| i.severity == ConfigSeverity::Warning));
    assert!(issues.iter().any(|i| i.field == "chat_model_id"));
}

#[test]
fn dangling_model_reference_is_an_error() {
    let (mut settings, _) = with_chat_model();
    settings.title_model_id = Some(Uuid::new_v4());
    let issues = settings.validate();
    let issue = issues
        .iter()
        .find(|i| i.field == "title_model_id")
        .expect("title issue");
    assert_eq!(issue.severity, ConfigSeverity::Error);
    assert!(issue.to_string().starts_with("[ERROR] title_model_id:"));
}

#[test]
fn bad_proactive_config_is_reported() {
    let (mut settings, _) = with_chat_model();
    let mut a = AssistantSetting::new("Ada");
    a.proactive.enabled = true;
    a.proactive.interval_minutes = 1;
    a.proactive.quiet_hours = Some(QuietHours::new("25:00", "06:00"));
    settings.assistants.push(a);
    settings.proactive.timezone = "Mars/Olympus".into();

    let fields: Vec<_> = settings.validate().into_iter().map(|i| i.field).collect();
    assert!(fields.contains(&"assistants[0].proactive.prompt".to_string()));
    assert!(fields.contains(&"assistants[0].proactive.interval_minutes".to_string()));
    assert!(fields.contains(&"assistants[0].proactive.quiet_hours".to_string()));
    assert!(fields.contains(&"proactive.timezone".to_string()));
}

#[test]
fn title_role_falls_back_to_chat_model() {
    let (settings, chat_id) = with_chat_model();
    let (_, title) = settings.model_for_role(ModelRole::Title, None).unwrap();
    assert_eq!(title.id, chat_id);
    assert!(settings.model_for_role(ModelRole::Ocr, None).is_none());
    assert!(settings.model_for_role(ModelRole::Suggestion, None).is_none());
}

#[test]
fn disabled_provider_hides_its_models() {
    let (mut settings, _) = with_chat_model();
    settings.providers[0].enabled = false;
    assert!(settings.model_for_role(ModelRole::Chat, None).is_none());
}

mod assistants;
mod injection;
mod models;
mod proactive;
mod prompts;
mod runtime;

pub use assistants::*;
pub use injection::*;
pub use models::*;
pub use proactive::*;
pub use prompts::*;
pub use runtime::*;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::{ModelRole, ModelType};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level settings snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Global chat model; assistants may override it.
    #[serde(default)]
    pub chat_model_id: Option<Uuid>,
    #[serde(default)]
    pub title_model_id: Option<Uuid>,
    #[serde(default)]
    pub suggestion_model_id: Option<Uuid>,
    #[serde(default)]
    pub translate_model_id: Option<Uuid>,
    #[serde(default)]
    pub ocr_model_id: Option<Uuid>,
    #[serde(default)]
    pub compress_model_id: Option<Uuid>,
    #[serde(default)]
    pub providers: Vec<ProviderSetting>,
    #[serde(default)]
    pub assistants: Vec<AssistantSetting>,
    /// Assistant new conversations are seeded with when the caller does not
    /// name one. Falls back to the first assistant.
    #[serde(default)]
    pub selected_assistant_id: Option<Uuid>,
    #[serde(default)]
    pub mode_injections: Vec<ModeInjection>,
    #[serde(default)]
    pub lorebooks: Vec<Lorebook>,
    #[serde(default)]
    pub prompts: PromptSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub proactive: ProactiveSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl Settings {
    /// Look a model up by its settings id, across enabled providers only.
    pub fn find_model(&self, id: Uuid) -> Option<(&ProviderSetting, &ModelSetting)> {
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .find_map(|p| p.models.iter().find(|m| m.id == id).map(|m| (p, m)))
    }

    /// Resolve the model configured for `role`.
    ///
    /// Chat honours the assistant override first. Title, translation and
    /// compression fall back to the chat model; suggestion and OCR do not.
    pub fn model_for_role(
        &self,
        role: ModelRole,
        assistant: Option<&AssistantSetting>,
    ) -> Option<(&ProviderSetting, &ModelSetting)> {
        let chat_id = assistant
            .and_then(|a| a.chat_model_id)
            .or(self.chat_model_id);
        let id = match role {
            ModelRole::Chat => chat_id,
            ModelRole::Title => self.title_model_id,
            ModelRole::Suggestion => self.suggestion_model_id,
            ModelRole::Translation => self.translate_model_id,
            ModelRole::Ocr => self.ocr_model_id,
            ModelRole::Compression => self.compress_model_id,
        };
        let id = match id {
            Some(id) => Some(id),
            None if role.falls_back_to_chat() => chat_id,
            None => None,
        }?;
        self.find_model(id)
            .filter(|(_, m)| m.model_type == ModelType::Chat)
    }

    pub fn find_assistant(&self, id: Uuid) -> Option<&AssistantSetting> {
        self.assistants.iter().find(|a| a.id == id)
    }

    pub fn find_assistant_mut(&mut self, id: Uuid) -> Option<&mut AssistantSetting> {
        self.assistants.iter_mut().find(|a| a.id == id)
    }

    pub fn selected_assistant(&self) -> Option<&AssistantSetting> {
        self.selected_assistant_id
            .and_then(|id| self.find_assistant(id))
            .or_else(|| self.assistants.first())
    }

    /// Mode injections the assistant opted into that are switched on.
    pub fn mode_injections_for<'a>(
        &'a self,
        assistant: &'a AssistantSetting,
    ) -> impl Iterator<Item = &'a ModeInjection> + 'a {
        self.mode_injections
            .iter()
            .filter(move |m| m.enabled && assistant.mode_injection_ids.contains(&m.id))
    }

    /// Lorebooks the assistant opted into that are switched on.
    pub fn lorebooks_for<'a>(
        &'a self,
        assistant: &'a AssistantSetting,
    ) -> impl Iterator<Item = &'a Lorebook> + 'a {
        self.lorebooks
            .iter()
            .filter(move |l| l.enabled && assistant.lorebook_ids.contains(&l.id))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Settings {
    /// Validate the settings and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let mut model_ids = HashSet::new();
        for (pi, provider) in self.providers.iter().enumerate() {
            for (mi, model) in provider.models.iter().enumerate() {
                if !model_ids.insert(model.id) {
                    issues.push(ConfigIssue::error(
                        format!("providers[{pi}].models[{mi}].id"),
                        format!("duplicate model id {}", model.id),
                    ));
                }
                if model.model_id.trim().is_empty() {
                    issues.push(ConfigIssue::error(
                        format!("providers[{pi}].models[{mi}].model_id"),
                        "model_id must not be empty",
                    ));
                }
            }
        }

        if self.chat_model_id.is_none() {
            issues.push(ConfigIssue::warning(
                "chat_model_id",
                "no chat model selected; generation will fail",
            ));
        }

        let refs = [
            ("chat_model_id", self.chat_model_id),
            ("title_model_id", self.title_model_id),
            ("suggestion_model_id", self.suggestion_model_id),
            ("translate_model_id", self.translate_model_id),
            ("ocr_model_id", self.ocr_model_id),
            ("compress_model_id", self.compress_model_id),
        ];
        for (field, id) in refs {
            if let Some(id) = id {
                if self.find_model(id).is_none() {
                    issues.push(ConfigIssue::error(
                        field,
                        format!("model {id} not found in any enabled provider"),
                    ));
                }
            }
        }

        if let Some(id) = self.selected_assistant_id {
            if self.find_assistant(id).is_none() {
                issues.push(ConfigIssue::error(
                    "selected_assistant_id",
                    format!("assistant {id} does not exist"),
                ));
            }
        }

        let tz_ok = self.proactive.timezone.parse::<chrono_tz::Tz>().is_ok();
        if !tz_ok {
            issues.push(ConfigIssue::error(
                "proactive.timezone",
                format!("unknown timezone \"{}\"", self.proactive.timezone),
            ));
        }
        if self.proactive.tick_secs == 0 {
            issues.push(ConfigIssue::error(
                "proactive.tick_secs",
                "tick must be greater than 0",
            ));
        }

        let mut assistant_ids = HashSet::new();
        for (i, assistant) in self.assistants.iter().enumerate() {
            let prefix = format!("assistants[{i}]");
            if !assistant_ids.insert(assistant.id) {
                issues.push(ConfigIssue::error(
                    format!("{prefix}.id"),
                    format!("duplicate assistant id {}", assistant.id),
                ));
            }
            if let Some(id) = assistant.chat_model_id {
                if self.find_model(id).is_none() {
                    issues.push(ConfigIssue::error(
                        format!("{prefix}.chat_model_id"),
                        format!("model {id} not found in any enabled provider"),
                    ));
                }
            }
            for id in &assistant.mode_injection_ids {
                if !self.mode_injections.iter().any(|m| m.id == *id) {
                    issues.push(ConfigIssue::warning(
                        format!("{prefix}.mode_injection_ids"),
                        format!("mode injection {id} does not exist"),
                    ));
                }
            }
            for id in &assistant.lorebook_ids {
                if !self.lorebooks.iter().any(|l| l.id == *id) {
                    issues.push(ConfigIssue::warning(
                        format!("{prefix}.lorebook_ids"),
                        format!("lorebook {id} does not exist"),
                    ));
                }
            }
            for (ri, rule) in assistant.regexes.iter().enumerate() {
                if let Err(e) = regex::Regex::new(&rule.find_regex) {
                    issues.push(ConfigIssue::error(
                        format!("{prefix}.regexes[{ri}].find_regex"),
                        format!("invalid regex: {e}"),
                    ));
                }
            }

            let proactive = &assistant.proactive;
            if proactive.enabled {
                if proactive.prompt.trim().is_empty() {
                    issues.push(ConfigIssue::error(
                        format!("{prefix}.proactive.prompt"),
                        "proactive messaging is enabled but the prompt is empty",
                    ));
                }
                if proactive.interval_minutes < self.proactive.min_interval_minutes {
                    issues.push(ConfigIssue::warning(
                        format!("{prefix}.proactive.interval_minutes"),
                        format!(
                            "interval {} is below the floor of {} minutes and will be raised",
                            proactive.interval_minutes, self.proactive.min_interval_minutes
                        ),
                    ));
                }
            }
            if let Some(quiet) = &proactive.quiet_hours {
                if quiet.parse().is_none() {
                    issues.push(ConfigIssue::error(
                        format!("{prefix}.proactive.quiet_hours"),
                        format!(
                            "quiet hours \"{}\"-\"{}\" must be HH:MM",
                            quiet.start, quiet.end
                        ),
                    ));
                }
            }
        }

        for (li, book) in self.lorebooks.iter().enumerate() {
            for (ei, entry) in book.entries.iter().enumerate() {
                if !entry.use_regex {
                    continue;
                }
                for kw in &entry.keywords {
                    if regex::Regex::new(kw).is_err() {
                        issues.push(ConfigIssue::warning(
                            format!("lorebooks[{li}].entries[{ei}].keywords"),
                            format!("keyword \"{kw}\" is not a valid regex and will never match"),
                        ));
                    }
                }
            }
        }

        issues
    }
}

//! `{{key}}` / `{key}` substitution.
//!
//! Keys are matched case-insensitively against a registry of resolvers.
//! Tokens with no resolver are left exactly as written.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parley_domain::message::{Message, Role};
use regex::{Captures, Regex};

use crate::context::TransformContext;

type Resolver = Arc<dyn Fn(&TransformContext) -> String + Send + Sync>;

fn token_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").ok()
    })
    .as_ref()
}

#[derive(Clone, Default)]
pub struct PlaceholderRegistry {
    resolvers: HashMap<String, Resolver>,
}

impl std::fmt::Debug for PlaceholderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.resolvers.keys().collect();
        keys.sort();
        f.debug_struct("PlaceholderRegistry").field("keys", &keys).finish()
    }
}

impl PlaceholderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in resolvers: `date`, `time`, `datetime`,
    /// `weekday`, `timezone`, `model_id`, `model_name`, `nickname`,
    /// `locale`, `assistant_name`.
    pub fn with_defaults() -> Self {
        Self::empty()
            .with("date", |c| c.local_now().format("%Y-%m-%d").to_string())
            .with("time", |c| c.local_now().format("%H:%M:%S").to_string())
            .with("datetime", |c| {
                c.local_now().format("%Y-%m-%d %H:%M:%S").to_string()
            })
            .with("weekday", |c| c.local_now().format("%A").to_string())
            .with("timezone", |c| c.settings.proactive.tz().name().to_string())
            .with("model_id", |c| c.model.model_id.clone())
            .with("model_name", |c| c.model.label().to_string())
            .with("nickname", |c| c.settings.display.nickname.clone())
            .with("locale", |c| c.settings.display.locale.clone())
            .with("assistant_name", |c| c.assistant.name.clone())
    }

    /// Add or replace a resolver. Host-specific values (battery level,
    /// device name) are registered this way.
    pub fn register<F>(&mut self, key: &str, resolver: F)
    where
        F: Fn(&TransformContext) -> String + Send + Sync + 'static,
    {
        self.resolvers
            .insert(key.to_ascii_lowercase(), Arc::new(resolver));
    }

    pub fn with<F>(mut self, key: &str, resolver: F) -> Self
    where
        F: Fn(&TransformContext) -> String + Send + Sync + 'static,
    {
        self.register(key, resolver);
        self
    }

    pub fn resolve(&self, key: &str, ctx: &TransformContext) -> Option<String> {
        self.resolvers
            .get(&key.to_ascii_lowercase())
            .map(|r| r(ctx))
    }

    /// Substitute every known token in `text`.
    pub fn substitute(&self, text: &str, ctx: &TransformContext) -> String {
        let Some(re) = token_re().filter(|_| text.contains('{')) else {
            return text.to_string();
        };
        re.replace_all(text, |caps: &Captures<'_>| {
            let key = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            self.resolve(key, ctx)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
    }

    pub(crate) fn apply(&self, ctx: &TransformContext, messages: Vec<Message>) -> Vec<Message> {
        messages
            .into_iter()
            .map(|m| match m.role {
                Role::Tool => m,
                _ => m.map_text(|t| self.substitute(t, ctx)),
            })
            .collect()
    }
}

//! Assistant message templates.
//!
//! Runs last in the input chain, so the text it wraps already carries
//! placeholder and injection output.

use std::sync::OnceLock;

use parley_domain::message::{ContentPart, Message, Role};
use regex::{Captures, Regex};

use crate::context::TransformContext;

fn var_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").ok())
        .as_ref()
}

/// Render `template` for one message. Unknown variables stay verbatim.
pub fn render(template: &str, message: &Message, ctx: &TransformContext) -> String {
    let text = message.text();
    let Some(re) = var_re() else {
        return text;
    };
    let local = message.created_at.with_timezone(&ctx.settings.proactive.tz());
    re.replace_all(template, |caps: &Captures<'_>| {
        match caps[1].to_ascii_lowercase().as_str() {
            "message" => text.clone(),
            "role" => format!("{:?}", message.role).to_lowercase(),
            "time" => local.format("%H:%M").to_string(),
            "date" => local.format("%Y-%m-%d").to_string(),
            "model_name" => ctx.model.label().to_string(),
            "nickname" => ctx.settings.display.nickname.clone(),
            "assistant_name" => ctx.assistant.name.clone(),
            _ => caps[0].to_string(),
        }
    })
    .into_owned()
}

fn is_identity(template: &str) -> bool {
    let t = template.trim();
    t.is_empty()
        || var_re()
            .and_then(|re| re.captures(t))
            .is_some_and(|c| c[0].len() == t.len() && c[1].eq_ignore_ascii_case("message"))
}

pub(crate) fn apply(ctx: &TransformContext, messages: Vec<Message>) -> Vec<Message> {
    let template = &ctx.assistant.message_template;
    if is_identity(template) {
        return messages;
    }
    messages
        .into_iter()
        .map(|m| {
            if m.role != Role::User || !m.parts.iter().any(|p| p.as_text().is_some()) {
                return m;
            }
            let mut parts = vec![ContentPart::text(render(template, &m, ctx))];
            parts.extend(m.parts.iter().filter(|p| p.as_text().is_none()).cloned());
            m.with_parts(parts)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ctx;

    #[test]
    fn default_template_is_a_no_op() {
        let c = ctx();
        let msgs = vec![Message::user("hi")];
        assert_eq!(apply(&c, msgs.clone()), msgs);
    }

    #[test]
    fn user_messages_are_wrapped() {
        let mut c = ctx();
        c.assistant.message_template = "[{{ role }} via {{model_name}}] {{ message }} {{ other }}".into();
        let out = apply(&c, vec![Message::assistant("reply"), Message::user("hi")]);
        assert_eq!(out[0].text(), "reply");
        assert_eq!(
            out[1].text(),
            format!("[user via {}] hi {{{{ other }}}}", c.model.label())
        );
    }

    #[test]
    fn non_text_parts_survive() {
        let mut c = ctx();
        c.assistant.message_template = "> {{ message }}".into();
        let msg = Message::new(
            Role::User,
            vec![ContentPart::text("see"), ContentPart::Image { url: "file:///x.png".into() }],
        );
        let out = apply(&c, vec![msg]);
        assert_eq!(out[0].parts.len(), 2);
        assert_eq!(out[0].parts[0].as_text(), Some("> see"));
    }
}

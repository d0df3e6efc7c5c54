//! Assistant-configured find/replace rules.

use parley_domain::config::AssistantRegex;
use parley_domain::message::{Message, Role};
use regex::Regex;

/// Compiled rules, skipping disabled and invalid ones.
fn compile<'a>(
    rules: &'a [AssistantRegex],
    visual: bool,
) -> impl Iterator<Item = (Regex, &'a str)> + 'a {
    rules
        .iter()
        .filter(move |r| r.enabled && r.visual_only == visual)
        .filter_map(|r| match Regex::new(&r.find_regex) {
            Ok(re) => Some((re, r.replace_string.as_str())),
            Err(e) => {
                tracing::debug!(rule = %r.name, error = %e, "skipping invalid regex rule");
                None
            }
        })
}

/// Apply either the persisted rules (`visual == false`) or the
/// display-only rules to assistant messages.
pub(crate) fn apply(rules: &[AssistantRegex], visual: bool, messages: Vec<Message>) -> Vec<Message> {
    let compiled: Vec<_> = compile(rules, visual).collect();
    if compiled.is_empty() {
        return messages;
    }
    messages
        .into_iter()
        .map(|m| {
            if m.role != Role::Assistant {
                return m;
            }
            m.map_text(|t| {
                compiled
                    .iter()
                    .fold(t.to_string(), |acc, (re, rep)| re.replace_all(&acc, *rep).into_owned())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn rule(find: &str, replace: &str, visual_only: bool) -> AssistantRegex {
        AssistantRegex {
            id: Uuid::new_v4(),
            name: find.into(),
            enabled: true,
            find_regex: find.into(),
            replace_string: replace.into(),
            visual_only,
        }
    }

    #[test]
    fn rules_touch_assistant_text_only() {
        let rules = vec![rule(r"\bcolour\b", "color", false)];
        let out = apply(
            &rules,
            false,
            vec![Message::user("colour"), Message::assistant("a colour wheel")],
        );
        assert_eq!(out[0].text(), "colour");
        assert_eq!(out[1].text(), "a color wheel");
    }

    #[test]
    fn visual_only_rules_split_from_persisted_ones() {
        let rules = vec![rule("secret", "[hidden]", true), rule("(\\d+)", "#$1", false)];
        let msgs = vec![Message::assistant("secret 42")];
        assert_eq!(apply(&rules, false, msgs.clone())[0].text(), "secret #42");
        assert_eq!(apply(&rules, true, msgs)[0].text(), "[hidden] 42");
    }

    #[test]
    fn invalid_rules_are_ignored() {
        let rules = vec![rule("(", "x", false), rule("a", "b", false)];
        let out = apply(&rules, false, vec![Message::assistant("aa")]);
        assert_eq!(out[0].text(), "bb");
    }
}

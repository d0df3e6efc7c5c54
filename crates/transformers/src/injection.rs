//! Prompt injection.
//!
//! Mode injections and triggered lorebook entries are collected, ordered by
//! priority and spliced into the outgoing list at their configured
//! position. Nothing is ever inserted between a tool-call message and the
//! tool-result message answering it.

use std::collections::BTreeMap;

use parley_domain::config::{AssistantSetting, InjectionPosition, LorebookEntry, Settings};
use parley_domain::message::{ContentPart, Message, Role};
use parley_domain::trace::TraceEvent;
use regex::RegexBuilder;
use uuid::Uuid;

/// Where an injection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionSource {
    Mode,
    Lorebook,
}

/// One triggered piece of content, ready to be placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub id: Uuid,
    pub source: InjectionSource,
    pub priority: i32,
    pub position: InjectionPosition,
    pub depth: usize,
    pub content: String,
}

pub fn wrap_reminder(content: &str) -> String {
    format!("<system_reminder>\n{content}\n</system_reminder>")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Text of the last `depth` non-system messages, oldest first.
fn scan_window(messages: &[Message], depth: usize) -> Vec<String> {
    let mut window: Vec<String> = messages
        .iter()
        .rev()
        .filter(|m| m.role != Role::System)
        .take(depth)
        .map(Message::text)
        .collect();
    window.reverse();
    window
}

/// Whether a lorebook entry fires for the given recent messages.
pub fn entry_triggered(entry: &LorebookEntry, messages: &[Message]) -> bool {
    if !entry.enabled {
        return false;
    }
    if entry.constant_active {
        return true;
    }
    let window = scan_window(messages, entry.scan_depth);
    if window.is_empty() {
        return false;
    }

    entry
        .keywords
        .iter()
        .filter(|kw| !kw.trim().is_empty())
        .any(|kw| {
            if entry.use_regex {
                match RegexBuilder::new(kw)
                    .case_insensitive(!entry.case_sensitive)
                    .build()
                {
                    Ok(re) => window.iter().any(|t| re.is_match(t)),
                    Err(e) => {
                        tracing::debug!(keyword = %kw, error = %e, "skipping invalid lorebook regex");
                        false
                    }
                }
            } else if entry.case_sensitive {
                window.iter().any(|t| t.contains(kw.as_str()))
            } else {
                let needle = kw.to_lowercase();
                window.iter().any(|t| t.to_lowercase().contains(&needle))
            }
        })
}

/// Every injection that applies to this request, highest priority first.
///
/// Pure: the same settings and messages always yield the same list.
pub fn collect_injections(
    settings: &Settings,
    assistant: &AssistantSetting,
    messages: &[Message],
) -> Vec<Injection> {
    let mut out: Vec<Injection> = settings
        .mode_injections_for(assistant)
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| Injection {
            id: m.id,
            source: InjectionSource::Mode,
            priority: m.priority,
            position: m.position,
            depth: m.inject_depth,
            content: m.content.clone(),
        })
        .collect();

    for book in settings.lorebooks_for(assistant) {
        for entry in &book.entries {
            if entry.content.trim().is_empty() || !entry_triggered(entry, messages) {
                continue;
            }
            out.push(Injection {
                id: entry.id,
                source: InjectionSource::Lorebook,
                priority: entry.priority,
                position: entry.position,
                depth: entry.inject_depth,
                content: entry.content.clone(),
            });
        }
    }

    // Stable: equal priorities keep configuration order.
    out.sort_by(|a, b| b.priority.cmp(&a.priority));
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Placement
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Move `index` backwards until inserting there cannot split a tool-call
/// message from the tool-result message that follows it.
pub fn find_safe_insert_index(messages: &[Message], index: usize) -> usize {
    let mut i = index.min(messages.len());
    while i > 0 && i < messages.len() {
        let before = &messages[i - 1];
        let after = &messages[i];
        if before.has_tool_calls() && after.has_tool_results() {
            i -= 1;
        } else {
            break;
        }
    }
    i
}

fn join(group: &[&Injection]) -> String {
    group
        .iter()
        .map(|i| i.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn reminder(group: &[&Injection]) -> Message {
    Message::user(wrap_reminder(&join(group)))
}

fn insert_safely(messages: &mut Vec<Message>, index: usize, message: Message) {
    let at = find_safe_insert_index(messages, index);
    messages.insert(at, message);
}

fn merge_system(messages: &mut Vec<Message>, before: &[&Injection], after: &[&Injection]) {
    if before.is_empty() && after.is_empty() {
        return;
    }
    let Some(pos) = messages.iter().position(|m| m.role == Role::System) else {
        let mut text = join(before);
        if !after.is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&join(after));
        }
        messages.insert(0, Message::system(text));
        return;
    };

    let original = messages[pos].text();
    let mut text = String::new();
    if !before.is_empty() {
        text.push_str(&join(before));
        text.push_str("\n\n");
    }
    text.push_str(&original);
    if !after.is_empty() {
        text.push_str("\n\n");
        text.push_str(&join(after));
    }
    let mut parts = vec![ContentPart::text(text)];
    parts.extend(messages[pos].parts.iter().filter(|p| p.as_text().is_none()).cloned());
    messages[pos] = messages[pos].with_parts(parts);
}

/// Splice `injections` (already priority-sorted) into `messages`.
pub fn apply_injections(mut messages: Vec<Message>, injections: &[Injection]) -> Vec<Message> {
    if injections.is_empty() {
        return messages;
    }

    let of = |pos: InjectionPosition| -> Vec<&Injection> {
        injections.iter().filter(|i| i.position == pos).collect()
    };
    let before = of(InjectionPosition::BeforeSystemPrompt);
    let after = of(InjectionPosition::AfterSystemPrompt);
    let top = of(InjectionPosition::TopOfChat);
    let bottom = of(InjectionPosition::BottomOfChat);

    let mut by_depth: BTreeMap<usize, Vec<&Injection>> = BTreeMap::new();
    for inj in injections
        .iter()
        .filter(|i| i.position == InjectionPosition::AtDepth)
    {
        by_depth.entry(inj.depth).or_default().push(inj);
    }

    merge_system(&mut messages, &before, &after);

    if !top.is_empty() {
        let first_user = messages
            .iter()
            .position(|m| m.role == Role::User)
            .unwrap_or(messages.len());
        insert_safely(&mut messages, first_user, reminder(&top));
    }

    // Offsets are measured from the end; going deepest first means each
    // insertion lands before every position still to be processed.
    let leading_system = messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .count();
    for (depth, group) in by_depth.iter().rev() {
        let index = messages.len().saturating_sub(*depth).max(leading_system);
        insert_safely(&mut messages, index, reminder(group));
    }

    if !bottom.is_empty() {
        let index = messages.len().saturating_sub(1).max(leading_system);
        insert_safely(&mut messages, index, reminder(&bottom));
    }

    messages
}

pub(crate) fn apply(
    settings: &Settings,
    assistant: &AssistantSetting,
    messages: Vec<Message>,
) -> Vec<Message> {
    let injections = collect_injections(settings, assistant, &messages);
    if injections.is_empty() {
        return messages;
    }
    TraceEvent::InjectionsApplied {
        mode_injections: injections
            .iter()
            .filter(|i| i.source == InjectionSource::Mode)
            .count(),
        lorebook_entries: injections
            .iter()
            .filter(|i| i.source == InjectionSource::Lorebook)
            .count(),
    }
    .emit();
    apply_injections(messages, &injections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_domain::config::{Lorebook, ModeInjection};
    use proptest::prelude::*;

    fn tool_call() -> Message {
        Message::new(
            Role::Assistant,
            vec![ContentPart::ToolCall {
                call_id: "c1".into(),
                tool_name: "search".into(),
                arguments: "{}".into(),
            }],
        )
    }

    fn tool_result() -> Message {
        Message::new(
            Role::Tool,
            vec![ContentPart::ToolResult {
                call_id: "c1".into(),
                tool_name: "search".into(),
                content: serde_json::json!("ok"),
                arguments: serde_json::json!({}),
            }],
        )
    }

    fn injection(position: InjectionPosition, priority: i32, depth: usize, content: &str) -> Injection {
        Injection {
            id: Uuid::new_v4(),
            source: InjectionSource::Mode,
            priority,
            position,
            depth,
            content: content.into(),
        }
    }

    fn entry(keywords: &[&str]) -> LorebookEntry {
        LorebookEntry {
            id: Uuid::new_v4(),
            name: "dragons".into(),
            enabled: true,
            priority: 0,
            position: InjectionPosition::AtDepth,
            content: "Dragons hoard gold.".into(),
            inject_depth: 1,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            use_regex: false,
            case_sensitive: false,
            scan_depth: 2,
            constant_active: false,
        }
    }

    fn texts(messages: &[Message]) -> Vec<String> {
        messages.iter().map(Message::text).collect()
    }

    #[test]
    fn safe_index_walks_out_of_tool_pairs() {
        let msgs = vec![Message::user("q"), tool_call(), tool_result(), Message::assistant("a")];
        assert_eq!(find_safe_insert_index(&msgs, 2), 1);
        assert_eq!(find_safe_insert_index(&msgs, 3), 3);
        assert_eq!(find_safe_insert_index(&msgs, 99), 4);
    }

    #[test]
    fn system_positions_merge_as_plain_text() {
        let msgs = vec![Message::system("You are helpful."), Message::user("hi")];
        let out = apply_injections(
            msgs,
            &[
                injection(InjectionPosition::BeforeSystemPrompt, 0, 0, "FIRST"),
                injection(InjectionPosition::AfterSystemPrompt, 0, 0, "LAST"),
            ],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text(), "FIRST\n\nYou are helpful.\n\nLAST");
    }

    #[test]
    fn missing_system_message_is_created() {
        let out = apply_injections(
            vec![Message::user("hi")],
            &[injection(InjectionPosition::AfterSystemPrompt, 0, 0, "rules")],
        );
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[0].text(), "rules");
    }

    #[test]
    fn chat_positions_insert_wrapped_user_messages() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("u1"),
            Message::assistant("a1"),
            Message::user("u2"),
        ];
        let out = apply_injections(
            msgs,
            &[
                injection(InjectionPosition::TopOfChat, 0, 0, "TOP"),
                injection(InjectionPosition::BottomOfChat, 0, 0, "BOTTOM"),
            ],
        );
        let t = texts(&out);
        assert_eq!(t[1], wrap_reminder("TOP"));
        assert_eq!(t[2], "u1");
        assert_eq!(t[t.len() - 2], wrap_reminder("BOTTOM"));
        assert_eq!(t[t.len() - 1], "u2");
        assert_eq!(out[1].role, Role::User);
    }

    #[test]
    fn depths_keep_their_relative_offsets() {
        let msgs: Vec<Message> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        let out = apply_injections(
            msgs,
            &[
                injection(InjectionPosition::AtDepth, 0, 1, "D1"),
                injection(InjectionPosition::AtDepth, 0, 3, "D3"),
            ],
        );
        assert_eq!(
            texts(&out),
            vec![
                "m0".to_string(),
                "m1".into(),
                wrap_reminder("D3"),
                "m2".into(),
                "m3".into(),
                wrap_reminder("D1"),
                "m4".into(),
            ]
        );
    }

    #[test]
    fn depth_insertion_skips_over_tool_pair() {
        let msgs = vec![Message::user("q"), tool_call(), tool_result()];
        let out = apply_injections(msgs, &[injection(InjectionPosition::AtDepth, 0, 1, "X")]);
        // depth 1 would land between call and result
        assert_eq!(out[1].text(), wrap_reminder("X"));
        assert!(out[2].has_tool_calls());
        assert!(out[3].has_tool_results());
    }

    #[test]
    fn higher_priority_comes_first_within_a_group() {
        let out = apply_injections(
            vec![Message::user("hi")],
            &[
                injection(InjectionPosition::AfterSystemPrompt, 9, 0, "high"),
                injection(InjectionPosition::AfterSystemPrompt, 1, 0, "low"),
            ],
        );
        assert_eq!(out[0].text(), "high\n\nlow");
    }

    #[test]
    fn keyword_matching() {
        let msgs = vec![
            Message::user("tell me about DRAGONS"),
            Message::assistant("sure"),
            Message::user("and knights"),
        ];
        assert!(!entry_triggered(&entry(&["dragon"]), &msgs));
        let mut deep = entry(&["dragon"]);
        deep.scan_depth = 3;
        assert!(entry_triggered(&deep, &msgs));

        let mut exact = entry(&["Knights"]);
        exact.case_sensitive = true;
        assert!(!entry_triggered(&exact, &msgs));

        let mut re = entry(&[r"kn\w+ts", "(unclosed"]);
        re.use_regex = true;
        assert!(entry_triggered(&re, &msgs));
    }

    #[test]
    fn collection_is_idempotent_and_sorted() {
        let mut assistant = AssistantSetting::new("a");
        let mode = ModeInjection {
            id: Uuid::new_v4(),
            name: "m".into(),
            enabled: true,
            priority: 1,
            position: InjectionPosition::AfterSystemPrompt,
            content: "mode".into(),
            inject_depth: 4,
        };
        let mut lore = entry(&["gold"]);
        lore.priority = 5;
        let book = Lorebook {
            id: Uuid::new_v4(),
            name: "b".into(),
            enabled: true,
            entries: vec![lore],
        };
        assistant.mode_injection_ids.push(mode.id);
        assistant.lorebook_ids.push(book.id);
        let settings = Settings {
            mode_injections: vec![mode],
            lorebooks: vec![book],
            ..Settings::default()
        };

        let msgs = vec![Message::user("where is the gold?")];
        let first = collect_injections(&settings, &assistant, &msgs);
        let second = collect_injections(&settings, &assistant, &msgs);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].source, InjectionSource::Lorebook);
    }

    fn arb_messages() -> impl Strategy<Value = Vec<Message>> {
        prop::collection::vec(0u8..3, 0..16).prop_map(|kinds| {
            let mut out = Vec::new();
            for k in kinds {
                match k {
                    0 => out.push(Message::user("u")),
                    1 => out.push(Message::assistant("a")),
                    _ => {
                        out.push(tool_call());
                        out.push(tool_result());
                    }
                }
            }
            out
        })
    }

    proptest! {
        #[test]
        fn safe_index_never_splits_a_pair(msgs in arb_messages(), raw in 0usize..40) {
            let i = find_safe_insert_index(&msgs, raw);
            prop_assert!(i <= msgs.len());
            prop_assert!(i <= raw.min(msgs.len()));
            if i > 0 && i < msgs.len() {
                prop_assert!(!(msgs[i - 1].has_tool_calls() && msgs[i].has_tool_results()));
            }
        }
    }
}

//! Pre-generation history repair.
//!
//! An assistant variant whose tool calls were never answered (a crash or a
//! cancel between the call and its result) would make most providers
//! reject the request, so such variants are dropped before every
//! generation.

use parley_domain::conversation::{Conversation, MessageNode};
use parley_domain::message::{Message, Role};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub dropped_variants: usize,
    pub pruned_nodes: usize,
}

impl RepairReport {
    pub fn is_noop(&self) -> bool {
        self.dropped_variants == 0 && self.pruned_nodes == 0
    }
}

/// Whether every tool call in `message` has a result in some variant of
/// `next`.
fn is_answered(message: &Message, next: Option<&MessageNode>) -> bool {
    let calls = message.tool_call_ids();
    if calls.is_empty() {
        return true;
    }
    let Some(next) = next else {
        return false;
    };
    next.messages.iter().any(|candidate| {
        let results = candidate.tool_result_ids();
        calls.iter().all(|id| results.contains(id))
    })
}

/// Drop unanswered tool-call variants, then prune empty nodes and clamp
/// selections back into range.
///
/// Removing the variant at or before the selection shifts the selection
/// down by one (saturating at zero); a node left without variants is
/// removed and any selection still out of range is reset to the first
/// variant.
pub fn repair_history(conversation: &Conversation) -> (Conversation, RepairReport) {
    let mut report = RepairReport::default();
    let mut nodes = conversation.nodes.clone();

    for i in 0..nodes.len() {
        let next = conversation.nodes.get(i + 1);
        let node = &mut nodes[i];
        let mut j = 0;
        while j < node.messages.len() {
            let message = &node.messages[j];
            if message.role == Role::Assistant && !is_answered(message, next) {
                node.messages.remove(j);
                if j <= node.select_index {
                    node.select_index = node.select_index.saturating_sub(1);
                }
                report.dropped_variants += 1;
            } else {
                j += 1;
            }
        }
    }

    // Pruning happens in `normalized`, which also moves the truncation
    // point back past removed nodes.
    report.pruned_nodes = nodes.iter().filter(|n| n.messages.is_empty()).count();

    let repaired = Conversation {
        nodes,
        ..conversation.clone()
    }
    .normalized();
    (repaired, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_domain::message::ContentPart;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn call(id: &str) -> Message {
        Message::new(
            Role::Assistant,
            vec![ContentPart::ToolCall {
                call_id: id.into(),
                tool_name: "search_web".into(),
                arguments: "{}".into(),
            }],
        )
    }

    fn result(id: &str) -> Message {
        Message::new(
            Role::Tool,
            vec![ContentPart::ToolResult {
                call_id: id.into(),
                tool_name: "search_web".into(),
                content: serde_json::json!("ok"),
                arguments: serde_json::json!({}),
            }],
        )
    }

    fn conv() -> Conversation {
        Conversation::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn only_variant_with_dangling_call_drops_node() {
        let c = conv()
            .with_appended(Message::user("look it up"))
            .with_appended(call("c1"));
        let (fixed, report) = repair_history(&c);
        assert_eq!(fixed.nodes.len(), 1);
        assert_eq!(report.dropped_variants, 1);
        assert_eq!(report.pruned_nodes, 1);
        assert!(fixed.is_consistent());
    }

    #[test]
    fn answered_calls_are_kept() {
        let c = conv()
            .with_appended(Message::user("look it up"))
            .with_appended(call("c1"))
            .with_appended(result("c1"))
            .with_appended(Message::assistant("found it"));
        let (fixed, report) = repair_history(&c);
        assert!(report.is_noop());
        assert_eq!(fixed, c);
    }

    #[test]
    fn dropping_selected_variant_moves_selection_down() {
        let c = conv().with_appended(Message::user("q"));
        let mut c = c.with_appended(Message::assistant("first"));
        c.nodes[1] = c.nodes[1].with_variant(call("c9"));
        assert_eq!(c.nodes[1].select_index, 1);

        let (fixed, report) = repair_history(&c);
        assert_eq!(report.dropped_variants, 1);
        assert_eq!(fixed.nodes[1].messages.len(), 1);
        assert_eq!(fixed.nodes[1].select_index, 0);
        assert_eq!(fixed.nodes[1].current_message().unwrap().text(), "first");
    }

    #[test]
    fn dropping_earlier_variant_keeps_same_message_selected() {
        let c = conv().with_appended(Message::user("q"));
        let mut c = c.with_appended(call("c1"));
        c.nodes[1] = c.nodes[1].with_variant(Message::assistant("second"));
        c.nodes[1] = c.nodes[1].with_variant(Message::assistant("third"));
        c.nodes[1].select_index = 1;

        let (fixed, _) = repair_history(&c);
        assert_eq!(fixed.nodes[1].current_message().unwrap().text(), "second");
    }

    #[test]
    fn truncate_index_is_clamped_after_pruning() {
        let mut c = conv()
            .with_appended(Message::user("q"))
            .with_appended(call("c1"));
        c.truncate_index = Some(2);
        let (fixed, _) = repair_history(&c);
        assert_eq!(fixed.truncate_index, Some(1));
    }

    #[test]
    fn pruning_before_the_cut_keeps_the_new_question_in_context() {
        let mut c = conv()
            .with_appended(Message::user("old"))
            .with_appended(call("c1"))
            .with_appended(Message::user("new question"));
        c.truncate_index = Some(2);

        let (fixed, report) = repair_history(&c);
        assert_eq!(report.pruned_nodes, 1);
        assert_eq!(fixed.truncate_index, Some(1));
        let ctx: Vec<String> = fixed.context_messages().iter().map(Message::text).collect();
        assert_eq!(ctx, vec!["new question".to_string()]);
    }

    proptest! {
        #[test]
        fn repaired_history_is_always_consistent(
            shape in proptest::collection::vec((0u8..3, 1usize..4, 0usize..4), 0..12),
        ) {
            let mut c = conv();
            for (kind, variants, select) in shape {
                let make = |k: usize| match kind {
                    0 => Message::user(format!("u{k}")),
                    1 => Message::assistant(format!("a{k}")),
                    _ => call(&format!("c{k}")),
                };
                let mut node = MessageNode::from_message(make(0));
                for k in 1..variants {
                    node = node.with_variant(make(k));
                }
                node.select_index = select;
                c.nodes.push(node);
            }
            let (fixed, _) = repair_history(&c);
            prop_assert!(fixed.is_consistent());
        }
    }
}

//! Conversation thread model.
//!
//! A [`Conversation`] is an ordered list of [`MessageNode`]s. Each node is
//! one logical turn holding one or more variants (regenerations, edits) and
//! a selected index. All mutating helpers return a new value so callers can
//! publish snapshots without sharing mutable state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, Role};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MessageNode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNode {
    pub id: Uuid,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub select_index: usize,
}

impl MessageNode {
    pub fn from_message(message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: vec![message],
            select_index: 0,
        }
    }

    /// The active variant. `None` only for a node with no variants, which
    /// never survives [`Conversation::normalized`].
    pub fn current_message(&self) -> Option<&Message> {
        self.messages.get(self.select_index)
    }

    pub fn role(&self) -> Option<Role> {
        self.current_message().map(|m| m.role)
    }

    pub fn contains(&self, message_id: Uuid) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    /// Append a variant and select it.
    pub fn with_variant(&self, message: Message) -> Self {
        let mut messages = self.messages.clone();
        messages.push(message);
        Self {
            id: self.id,
            select_index: messages.len() - 1,
            messages,
        }
    }

    fn is_valid(&self) -> bool {
        !self.messages.is_empty() && self.select_index < self.messages.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub assistant_id: Uuid,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub nodes: Vec<MessageNode>,
    /// Nodes before this index are left out of the context sent to a
    /// model. `None` means no truncation.
    #[serde(default)]
    pub truncate_index: Option<usize>,
    #[serde(default)]
    pub chat_suggestions: Vec<String>,
    #[serde(default)]
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: Uuid, assistant_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            assistant_id,
            title: String::new(),
            nodes: Vec::new(),
            truncate_index: None,
            chat_suggestions: Vec::new(),
            is_pinned: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Selected variant of every node, in order.
    pub fn current_messages(&self) -> Vec<Message> {
        self.nodes
            .iter()
            .filter_map(|n| n.current_message().cloned())
            .collect()
    }

    /// Selected variants from the truncation point onward.
    pub fn context_messages(&self) -> Vec<Message> {
        let start = self.truncate_index.unwrap_or(0).min(self.nodes.len());
        self.nodes[start..]
            .iter()
            .filter_map(|n| n.current_message().cloned())
            .collect()
    }

    pub fn node_index_of(&self, message_id: Uuid) -> Option<usize> {
        self.nodes.iter().position(|n| n.contains(message_id))
    }

    pub fn find_message(&self, message_id: Uuid) -> Option<&Message> {
        self.nodes
            .iter()
            .flat_map(|n| n.messages.iter())
            .find(|m| m.id == message_id)
    }

    /// Append one node holding `message`.
    pub fn with_appended(&self, message: Message) -> Self {
        let mut next = self.clone();
        next.nodes.push(MessageNode::from_message(message));
        next.updated_at = Utc::now();
        next
    }

    /// Fold a full message list (as produced by a generation stream) into
    /// the node list.
    ///
    /// Position `i` of `messages` maps to node `i`. A message whose id is
    /// already a variant of that node replaces it in place; otherwise it is
    /// appended as a new selected variant. Positions past the end become new
    /// nodes.
    pub fn update_current_messages(&self, messages: &[Message]) -> Self {
        self.update_messages_from(0, messages)
    }

    /// Like [`Conversation::update_current_messages`], with `messages[0]`
    /// mapped to node `start`. Nodes before `start` are left as they are.
    pub fn update_messages_from(&self, start: usize, messages: &[Message]) -> Self {
        let mut nodes = self.nodes.clone();
        for (offset, message) in messages.iter().enumerate() {
            match nodes.get_mut(start + offset) {
                Some(node) => {
                    if let Some(pos) = node.messages.iter().position(|m| m.id == message.id) {
                        node.messages[pos] = message.clone();
                    } else {
                        node.messages.push(message.clone());
                        node.select_index = node.messages.len() - 1;
                    }
                }
                None => nodes.push(MessageNode::from_message(message.clone())),
            }
        }
        Self {
            nodes,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Replace one variant (matched by id) wherever it lives.
    pub fn with_message_replaced(&self, message: &Message) -> Self {
        let mut next = self.clone();
        for node in &mut next.nodes {
            if let Some(slot) = node.messages.iter_mut().find(|m| m.id == message.id) {
                *slot = message.clone();
            }
        }
        next.updated_at = Utc::now();
        next
    }

    /// Keep only the first `len` nodes.
    pub fn truncated_to(&self, len: usize) -> Self {
        let mut next = self.clone();
        next.nodes.truncate(len);
        next.normalized()
    }

    /// Restore the structural invariants: no empty nodes, every selection in
    /// range, truncation index within `[0, len]`.
    ///
    /// Pruning a node before the truncation point moves the point back by
    /// one, so the same messages stay on each side of it.
    pub fn normalized(&self) -> Self {
        let mut next = self.clone();
        if let Some(cut) = next.truncate_index {
            let pruned_before = next
                .nodes
                .iter()
                .take(cut)
                .filter(|n| n.messages.is_empty())
                .count();
            next.truncate_index = Some(cut - pruned_before);
        }
        next.nodes.retain(|n| !n.messages.is_empty());
        for node in &mut next.nodes {
            if node.select_index >= node.messages.len() {
                node.select_index = 0;
            }
        }
        next.truncate_index = next.truncate_index.map(|i| i.min(next.nodes.len()));
        next
    }

    /// Whether every structural invariant currently holds.
    pub fn is_consistent(&self) -> bool {
        self.nodes.iter().all(MessageNode::is_valid)
            && self.truncate_index.map_or(true, |i| i <= self.nodes.len())
    }

    /// Serialized size of the node list, used to warn about conversations
    /// that are getting too large to persist comfortably.
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(&self.nodes).map(|v| v.len()).unwrap_or(0)
    }

    /// Text of the last assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.nodes
            .iter()
            .rev()
            .filter_map(|n| n.current_message())
            .find(|m| m.role == Role::Assistant && !m.text().trim().is_empty())
            .map(Message::text)
    }
}

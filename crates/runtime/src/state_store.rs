//! In-memory conversation state with observer reference counts.
//!
//! Each loaded conversation lives behind a `watch` channel so any number of
//! observers see the latest snapshot. A conversation stays resident while it
//! has observers or a running generation; the owner calls
//! [`ConversationStateStore::evict_if_unused`] after a short delay once
//! either count drops.

use std::sync::Arc;

use dashmap::DashMap;
use parley_domain::conversation::Conversation;
use tokio::sync::watch;
use uuid::Uuid;

type Slot = Arc<watch::Sender<Conversation>>;

#[derive(Default)]
pub struct ConversationStateStore {
    conversations: DashMap<Uuid, Slot>,
    refs: DashMap<Uuid, usize>,
}

impl ConversationStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `conversation` unless an entry already exists, and return the
    /// resident slot either way.
    pub fn get_or_insert(&self, conversation: Conversation) -> Slot {
        self.conversations
            .entry(conversation.id)
            .or_insert_with(|| Arc::new(watch::Sender::new(conversation)))
            .clone()
    }

    pub fn slot(&self, id: Uuid) -> Option<Slot> {
        self.conversations.get(&id).map(|s| s.clone())
    }

    /// Current snapshot, if resident.
    pub fn get(&self, id: Uuid) -> Option<Conversation> {
        self.conversations.get(&id).map(|s| s.borrow().clone())
    }

    pub fn subscribe(&self, id: Uuid) -> Option<watch::Receiver<Conversation>> {
        self.conversations.get(&id).map(|s| s.subscribe())
    }

    /// Publish a whole snapshot, creating the entry if needed.
    pub fn publish(&self, conversation: Conversation) {
        match self.slot(conversation.id) {
            Some(slot) => {
                slot.send_replace(conversation);
            }
            None => {
                self.get_or_insert(conversation);
            }
        }
    }

    /// Apply `f` to the resident snapshot atomically and return the result.
    pub fn modify<F>(&self, id: Uuid, f: F) -> Option<Conversation>
    where
        F: FnOnce(&Conversation) -> Conversation,
    {
        let slot = self.slot(id)?;
        let mut out = None;
        slot.send_modify(|c| {
            let next = f(&*c);
            out = Some(next.clone());
            *c = next;
        });
        out
    }

    /// Like [`ConversationStateStore::modify`], but `f` may decline by
    /// returning `None`, in which case observers are not notified.
    pub fn modify_if<F>(&self, id: Uuid, f: F) -> Option<Conversation>
    where
        F: FnOnce(&Conversation) -> Option<Conversation>,
    {
        let slot = self.slot(id)?;
        let mut out = None;
        slot.send_if_modified(|c| match f(&*c) {
            Some(next) => {
                out = Some(next.clone());
                *c = next;
                true
            }
            None => false,
        });
        out
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.conversations.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    // ── Reference counting ──────────────────────────────────────────

    pub fn add_ref(&self, id: Uuid) -> usize {
        let mut count = self.refs.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop one reference. Returns the remaining count.
    pub fn remove_ref(&self, id: Uuid) -> usize {
        let remaining = match self.refs.get_mut(&id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.refs.remove_if(&id, |_, c| *c == 0);
        }
        remaining
    }

    pub fn ref_count(&self, id: Uuid) -> usize {
        self.refs.get(&id).map(|c| *c).unwrap_or(0)
    }

    /// Remove the entry when nobody references it and `busy` is false.
    /// Returns whether an entry was evicted.
    pub fn evict_if_unused(&self, id: Uuid, busy: bool) -> bool {
        if busy || self.ref_count(id) > 0 {
            return false;
        }
        self.conversations.remove(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_domain::message::Message;

    fn conv() -> Conversation {
        Conversation::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn get_or_insert_keeps_first_value() {
        let store = ConversationStateStore::new();
        let first = conv();
        let id = first.id;
        store.get_or_insert(first.with_appended(Message::user("kept")));
        let mut other = conv();
        other.id = id;
        store.get_or_insert(other);
        assert_eq!(store.get(id).unwrap().nodes.len(), 1);
    }

    #[test]
    fn modify_is_visible_to_subscribers() {
        let store = ConversationStateStore::new();
        let c = conv();
        let id = c.id;
        store.publish(c);
        let rx = store.subscribe(id).unwrap();
        store.modify(id, |c| c.with_appended(Message::user("hi")));
        assert_eq!(rx.borrow().nodes.len(), 1);
    }

    #[test]
    fn referenced_or_busy_entries_survive_eviction() {
        let store = ConversationStateStore::new();
        let c = conv();
        let id = c.id;
        store.publish(c);

        store.add_ref(id);
        assert!(!store.evict_if_unused(id, false));
        assert_eq!(store.remove_ref(id), 0);
        assert!(!store.evict_if_unused(id, true));
        assert!(store.evict_if_unused(id, false));
        assert!(!store.contains(id));
    }

    #[test]
    fn remove_ref_never_underflows() {
        let store = ConversationStateStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.remove_ref(id), 0);
        store.add_ref(id);
        store.add_ref(id);
        assert_eq!(store.remove_ref(id), 1);
        assert_eq!(store.ref_count(id), 1);
    }
}

use std::collections::HashMap;

use parking_lot::RwLock;
use parley_domain::conversation::Conversation;
use parley_domain::error::{Error, Result};
use uuid::Uuid;

use crate::repository::{latest, ConversationRepository};

/// Process-local repository. Used by tests and by hosts that persist
/// elsewhere.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.read().is_empty()
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationStore {
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().get(&id).cloned())
    }

    async fn insert(&self, conversation: &Conversation) -> Result<()> {
        let mut map = self.conversations.write();
        if map.contains_key(&conversation.id) {
            return Err(Error::Persistence(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        map.insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn update(&self, conversation: &Conversation) -> Result<()> {
        let mut map = self.conversations.write();
        match map.get_mut(&conversation.id) {
            Some(slot) => {
                *slot = conversation.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("conversation {}", conversation.id))),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.conversations.write().remove(&id);
        Ok(())
    }

    async fn latest_for_assistant(&self, assistant_id: Uuid) -> Result<Option<Conversation>> {
        Ok(latest(self.conversations.read().values(), assistant_id))
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        Ok(self.conversations.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_domain::message::Message;

    #[tokio::test]
    async fn insert_then_update() {
        let store = InMemoryConversationStore::new();
        let c = Conversation::new(Uuid::new_v4(), Uuid::new_v4());
        store.insert(&c).await.unwrap();
        assert!(store.insert(&c).await.is_err());

        let next = c.with_appended(Message::user("hi"));
        store.update(&next).await.unwrap();
        let back = store.get(c.id).await.unwrap().unwrap();
        assert_eq!(back.nodes.len(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_id_fails() {
        let store = InMemoryConversationStore::new();
        let c = Conversation::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(store.update(&c).await, Err(Error::NotFound(_))));
        store.upsert(&c).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn latest_for_assistant_picks_most_recent() {
        let store = InMemoryConversationStore::new();
        let assistant = Uuid::new_v4();
        let mut old = Conversation::new(Uuid::new_v4(), assistant);
        old.updated_at = old.updated_at - chrono::Duration::hours(1);
        let new = Conversation::new(Uuid::new_v4(), assistant);
        let other = Conversation::new(Uuid::new_v4(), Uuid::new_v4());
        for c in [&old, &new, &other] {
            store.insert(c).await.unwrap();
        }
        let got = store.latest_for_assistant(assistant).await.unwrap().unwrap();
        assert_eq!(got.id, new.id);
    }
}

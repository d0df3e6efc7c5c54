use parley_domain::conversation::Conversation;
use parley_domain::error::Result;
use uuid::Uuid;

/// Durable storage for conversations.
///
/// Implementations must be safe to call from many generation tasks at
/// once; each call is independent and last write wins.
#[async_trait::async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Store a conversation that does not exist yet.
    async fn insert(&self, conversation: &Conversation) -> Result<()>;

    /// Overwrite an existing conversation.
    async fn update(&self, conversation: &Conversation) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// The assistant's most recently updated conversation.
    async fn latest_for_assistant(&self, assistant_id: Uuid) -> Result<Option<Conversation>>;

    async fn list(&self) -> Result<Vec<Conversation>>;

    /// Insert if absent, otherwise update.
    async fn upsert(&self, conversation: &Conversation) -> Result<()> {
        if self.get(conversation.id).await?.is_some() {
            self.update(conversation).await
        } else {
            self.insert(conversation).await
        }
    }
}

pub(crate) fn latest<'a>(
    conversations: impl Iterator<Item = &'a Conversation>,
    assistant_id: Uuid,
) -> Option<Conversation> {
    conversations
        .filter(|c| c.assistant_id == assistant_id)
        .max_by_key(|c| c.updated_at)
        .cloned()
}

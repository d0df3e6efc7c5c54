//! Conversation store backed by a single JSON file.
//!
//! Persists every conversation in `conversations.json` under the given
//! state directory. The whole map is rewritten on every mutation through a
//! temp file and rename, so a crash never leaves a half-written file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use parley_domain::conversation::Conversation;
use parley_domain::error::{Error, Result};
use uuid::Uuid;

use crate::repository::{latest, ConversationRepository};

pub struct JsonFileConversationStore {
    path: PathBuf,
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    /// Serializes flushes so two writers never race on the temp file.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileConversationStore {
    /// Load or create the store at `state_path/conversations.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;

        let path = state_path.join("conversations.json");
        let conversations: HashMap<Uuid, Conversation> = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "conversation file unreadable, starting empty"
                    );
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        tracing::info!(
            conversations = conversations.len(),
            path = %path.display(),
            "conversation store loaded"
        );

        Ok(Self {
            path,
            conversations: RwLock::new(conversations),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the current state to disk.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let json = {
            let map = self.conversations.read();
            serde_json::to_vec_pretty(&*map)
                .map_err(|e| Error::Persistence(format!("serializing conversations: {e}")))?
        };
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(Error::Io)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationRepository for JsonFileConversationStore {
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().get(&id).cloned())
    }

    async fn insert(&self, conversation: &Conversation) -> Result<()> {
        {
            let mut map = self.conversations.write();
            if map.contains_key(&conversation.id) {
                return Err(Error::Persistence(format!(
                    "conversation {} already exists",
                    conversation.id
                )));
            }
            map.insert(conversation.id, conversation.clone());
        }
        self.flush().await
    }

    async fn update(&self, conversation: &Conversation) -> Result<()> {
        {
            let mut map = self.conversations.write();
            let Some(slot) = map.get_mut(&conversation.id) else {
                return Err(Error::NotFound(format!("conversation {}", conversation.id)));
            };
            *slot = conversation.clone();
        }
        self.flush().await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let removed = self.conversations.write().remove(&id).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(())
    }

    async fn latest_for_assistant(&self, assistant_id: Uuid) -> Result<Option<Conversation>> {
        Ok(latest(self.conversations.read().values(), assistant_id))
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        Ok(self.conversations.read().values().cloned().collect())
    }
}

//! User-visible error list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_domain::error::Error;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatErrorSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ChatError {
    pub id: Uuid,
    pub error: Arc<Error>,
    pub severity: ChatErrorSeverity,
    pub conversation_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl ChatError {
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// Accumulates errors until the UI dismisses them.
pub struct ChatErrorList {
    errors: watch::Sender<Vec<ChatError>>,
}

impl Default for ChatErrorList {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatErrorList {
    pub fn new() -> Self {
        Self {
            errors: watch::Sender::new(Vec::new()),
        }
    }

    /// Record an error. Cancellation is not an error and is ignored.
    pub fn push(
        &self,
        error: Error,
        severity: ChatErrorSeverity,
        conversation_id: Option<Uuid>,
    ) -> Option<Uuid> {
        if error.is_cancelled() {
            return None;
        }
        let entry = ChatError {
            id: Uuid::new_v4(),
            error: Arc::new(error),
            severity,
            conversation_id,
            timestamp: Utc::now(),
        };
        let id = entry.id;
        self.errors.send_modify(|list| list.push(entry));
        Some(id)
    }

    pub fn error(&self, error: Error, conversation_id: Option<Uuid>) -> Option<Uuid> {
        self.push(error, ChatErrorSeverity::Error, conversation_id)
    }

    pub fn warning(&self, error: Error, conversation_id: Option<Uuid>) -> Option<Uuid> {
        self.push(error, ChatErrorSeverity::Warning, conversation_id)
    }

    pub fn dismiss(&self, id: Uuid) {
        self.errors.send_if_modified(|list| {
            let before = list.len();
            list.retain(|e| e.id != id);
            list.len() != before
        });
    }

    pub fn clear(&self) {
        self.errors.send_if_modified(|list| {
            let changed = !list.is_empty();
            list.clear();
            changed
        });
    }

    pub fn snapshot(&self) -> Vec<ChatError> {
        self.errors.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatError>> {
        self.errors.subscribe()
    }
}

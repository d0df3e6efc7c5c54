use async_trait::async_trait;
use uuid::Uuid;

/// Longest notification body, in characters.
const NOTICE_BODY_CHARS: usize = 160;

/// What the host shows when a proactive reply has arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct ProactiveNotice {
    pub assistant_id: Uuid,
    pub assistant_name: String,
    pub conversation_id: Uuid,
    pub body: String,
}

impl ProactiveNotice {
    pub fn new(assistant_id: Uuid, assistant_name: &str, conversation_id: Uuid, text: &str) -> Self {
        Self {
            assistant_id,
            assistant_name: assistant_name.to_owned(),
            conversation_id,
            body: summarize(text),
        }
    }
}

fn summarize(text: &str) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= NOTICE_BODY_CHARS {
        return text;
    }
    let mut out: String = text.chars().take(NOTICE_BODY_CHARS - 1).collect();
    out.push('…');
    out
}

/// Host integration for proactive replies. Both calls are fire-and-forget;
/// failures stay inside the implementation.
#[async_trait]
pub trait ProactiveHooks: Send + Sync {
    async fn notify(&self, notice: ProactiveNotice);

    /// Bring the conversation to the foreground. Only called while the app
    /// is in the foreground.
    async fn open_conversation(&self, conversation_id: Uuid);
}

/// Logs notices instead of showing them. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

#[async_trait]
impl ProactiveHooks for LoggingHooks {
    async fn notify(&self, notice: ProactiveNotice) {
        tracing::info!(
            assistant = %notice.assistant_name,
            conversation_id = %notice.conversation_id,
            body = %notice.body,
            "proactive reply"
        );
    }

    async fn open_conversation(&self, conversation_id: Uuid) {
        tracing::info!(conversation_id = %conversation_id, "open conversation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_bodies_are_cut() {
        let text = "word ".repeat(100);
        let notice = ProactiveNotice::new(Uuid::nil(), "Ada", Uuid::nil(), &text);
        assert_eq!(notice.body.chars().count(), NOTICE_BODY_CHARS);
        assert!(notice.body.ends_with('…'));
    }

    #[test]
    fn whitespace_is_collapsed() {
        let notice = ProactiveNotice::new(Uuid::nil(), "Ada", Uuid::nil(), "  hi\n\nthere  ");
        assert_eq!(notice.body, "hi there");
    }
}

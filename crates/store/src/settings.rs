//! Settings snapshot and the process-wide idle signals.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_domain::config::Settings;
use tokio::sync::watch;

type Stamp = Option<DateTime<Utc>>;

/// Holds the current [`Settings`] and the activity timestamps the proactive
/// scheduler keys off.
///
/// Every value is a `watch` channel: readers take cheap snapshots or
/// subscribe for changes.
pub struct SettingsStore {
    settings: watch::Sender<Arc<Settings>>,
    last_user_message_at: watch::Sender<Stamp>,
    last_conversation_done_at: watch::Sender<Stamp>,
    last_app_backgrounded_at: watch::Sender<Stamp>,
    app_foreground: watch::Sender<bool>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: watch::Sender::new(Arc::new(settings)),
            last_user_message_at: watch::Sender::new(None),
            last_conversation_done_at: watch::Sender::new(None),
            last_app_backgrounded_at: watch::Sender::new(None),
            app_foreground: watch::Sender::new(true),
        }
    }

    /// Current settings.
    pub fn snapshot(&self) -> Arc<Settings> {
        self.settings.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.settings.subscribe()
    }

    /// Apply `f` to a copy of the current settings and publish the result.
    ///
    /// The read, `f` and the publish happen under the channel's write lock,
    /// so concurrent updates never overwrite each other.
    pub fn update<F>(&self, f: F) -> Arc<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut published = None;
        self.settings.send_modify(|current| {
            let mut next = (**current).clone();
            f(&mut next);
            *current = Arc::new(next);
            published = Some(current.clone());
        });
        published.unwrap_or_else(|| self.snapshot())
    }

    /// Replace the settings wholesale (e.g. after a reload).
    pub fn replace(&self, settings: Settings) {
        self.settings.send_replace(Arc::new(settings));
    }

    // ── activity signals ─────────────────────────────────────────────

    pub fn record_user_message(&self, at: DateTime<Utc>) {
        self.last_user_message_at.send_replace(Some(at));
    }

    pub fn record_conversation_done(&self, at: DateTime<Utc>) {
        self.last_conversation_done_at.send_replace(Some(at));
    }

    pub fn record_app_backgrounded(&self, at: DateTime<Utc>) {
        self.last_app_backgrounded_at.send_replace(Some(at));
        self.app_foreground.send_replace(false);
    }

    pub fn set_app_foreground(&self, foreground: bool) {
        self.app_foreground.send_replace(foreground);
    }

    pub fn last_user_message_at(&self) -> Stamp {
        *self.last_user_message_at.borrow()
    }

    pub fn last_conversation_done_at(&self) -> Stamp {
        *self.last_conversation_done_at.borrow()
    }

    pub fn last_app_backgrounded_at(&self) -> Stamp {
        *self.last_app_backgrounded_at.borrow()
    }

    pub fn is_app_foreground(&self) -> bool {
        *self.app_foreground.borrow()
    }

    pub fn watch_last_user_message_at(&self) -> watch::Receiver<Stamp> {
        self.last_user_message_at.subscribe()
    }

    pub fn watch_last_conversation_done_at(&self) -> watch::Receiver<Stamp> {
        self.last_conversation_done_at.subscribe()
    }

    pub fn watch_last_app_backgrounded_at(&self) -> watch::Receiver<Stamp> {
        self.last_app_backgrounded_at.subscribe()
    }

    pub fn watch_app_foreground(&self) -> watch::Receiver<bool> {
        self.app_foreground.subscribe()
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

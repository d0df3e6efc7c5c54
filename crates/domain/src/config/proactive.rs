use serde::{Deserialize, Serialize};

/// Process-wide knobs for the proactive scheduler. Per-assistant settings
/// live in [`super::ProactiveConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveSettings {
    /// Poll period of the scheduler loop.
    #[serde(default = "d_tick_secs")]
    pub tick_secs: u64,
    /// Idle time after a conversation finishes or the app is backgrounded
    /// before the idle clock starts.
    #[serde(default = "d_grace_secs")]
    pub grace_period_secs: u64,
    /// IANA zone used to interpret quiet hours, e.g. `"Europe/Berlin"`.
    #[serde(default = "d_timezone")]
    pub timezone: String,
    /// Pending triggers without a completion signal are dropped after this.
    #[serde(default = "d_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
    /// Floor applied to every assistant's `interval_minutes`.
    #[serde(default = "d_min_interval")]
    pub min_interval_minutes: u32,
}

impl Default for ProactiveSettings {
    fn default() -> Self {
        Self {
            tick_secs: d_tick_secs(),
            grace_period_secs: d_grace_secs(),
            timezone: d_timezone(),
            pending_ttl_secs: d_pending_ttl_secs(),
            min_interval_minutes: d_min_interval(),
        }
    }
}

impl ProactiveSettings {
    /// Parsed zone, falling back to UTC when the name is unknown.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

fn d_tick_secs() -> u64 {
    30
}
fn d_grace_secs() -> u64 {
    60
}
fn d_timezone() -> String {
    "UTC".into()
}
fn d_pending_ttl_secs() -> u64 {
    2 * 60 * 60
}
fn d_min_interval() -> u32 {
    5
}

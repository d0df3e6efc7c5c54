use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_domain::config::{AssistantSetting, ModelSetting, Settings};
use parley_domain::error::{Error, Result};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a stage may read while transforming one request.
///
/// Built once per generation step; stages never mutate it.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub settings: Arc<Settings>,
    pub assistant: AssistantSetting,
    /// Model the messages are about to be sent to.
    pub model: ModelSetting,
    pub conversation_id: Uuid,
    pub now: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl TransformContext {
    pub fn new(
        settings: Arc<Settings>,
        assistant: AssistantSetting,
        model: ModelSetting,
        conversation_id: Uuid,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            assistant,
            model,
            conversation_id,
            now: Utc::now(),
            cancel,
        }
    }

    /// `Err(Cancelled)` once the owning task has been cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Current time in the configured zone.
    pub fn local_now(&self) -> DateTime<chrono_tz::Tz> {
        self.now.with_timezone(&self.settings.proactive.tz())
    }
}

//! Assistant-initiated messages.
//!
//! A fixed-period loop asks [`ProactiveScheduler::tick`] which assistants
//! are due. A due assistant sends its configured prompt through the normal
//! send path; when that generation completes, the host is notified through
//! [`ProactiveHooks`].

pub mod hooks;
pub mod scheduler;
pub mod timing;

pub use hooks::{LoggingHooks, ProactiveHooks, ProactiveNotice};
pub use scheduler::{plan_assistant, IdleSignals, PendingProactiveTrigger, ProactiveScheduler};

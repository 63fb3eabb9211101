// # Notifier Trait
//
// Fire-and-forget notification sink for cycle summaries and lifecycle
// messages. Delivery failures are logged by the caller and never fatal.

use async_trait::async_trait;
use std::fmt;

/// Notification priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Lifecycle information
    Info,
    /// Degraded operation
    Warning,
    /// Failures needing attention
    Error,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Info => f.write_str("info"),
            Priority::Warning => f.write_str("warning"),
            Priority::Error => f.write_str("error"),
        }
    }
}

/// Trait for notification sinks
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message
    async fn notify(&self, priority: Priority, message: &str) -> Result<(), crate::Error>;
}

/// Notifier that only writes to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, priority: Priority, message: &str) -> Result<(), crate::Error> {
        match priority {
            Priority::Info => tracing::info!(notification = %message),
            Priority::Warning => tracing::warn!(notification = %message),
            Priority::Error => tracing::error!(notification = %message),
        }
        Ok(())
    }
}

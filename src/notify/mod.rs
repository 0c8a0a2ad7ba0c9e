// Outbound notifications
pub mod formatter;

pub use formatter::{MonitorState, SignalFormatter};

use async_trait::async_trait;

use crate::error::NotifyError;

/// Message transport
///
/// Delivery is best effort: a failure is reported to the caller and never
/// changes signal lifecycle state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<(), NotifyError>;

    fn name(&self) -> &'static str;
}

/// Writes messages to the log instead of a chat channel
///
/// Used when no transport credentials are configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, text: &str) -> Result<(), NotifyError> {
        tracing::info!("📨 {}", text.replace('\n', " / "));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        assert!(notifier.deliver("line one\nline two").await.is_ok());
        assert_eq!(notifier.name(), "log");
    }
}

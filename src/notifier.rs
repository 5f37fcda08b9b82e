//! Notification delivery seam.

use async_trait::async_trait;
use tracing::info;

/// Delivers a rendered notification to a recipient.
///
/// The concrete transport (SMTP, webhook, ...) lives outside this crate;
/// the runner only needs send-or-fail semantics. A failed send leaves the
/// alert's `last_notified` untouched, so the next run retries it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, text: &str, html: &str) -> anyhow::Result<()>;
}

/// Notifier that writes deliveries to the log instead of a transport.
///
/// The default when no transport is wired up, e.g. local runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, text: &str, _html: &str) -> anyhow::Result<()> {
        info!(to = %to, subject = %subject, body_bytes = text.len(), "notification logged");
        Ok(())
    }
}

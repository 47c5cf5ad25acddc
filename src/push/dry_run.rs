use async_trait::async_trait;

use super::{DeliveryReport, PushMessage, PushTransport, TransportError};

/// Logs notifications instead of sending them.
pub struct DryRunTransport;

#[async_trait]
impl PushTransport for DryRunTransport {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn deliver(&self, message: &PushMessage, recipients: &[String]) -> Result<DeliveryReport, TransportError> {
        log::info!("[dry-run] {}: {} ({} recipient(s))", message.title, message.body, recipients.len());
        Ok(DeliveryReport::Accepted)
    }
}

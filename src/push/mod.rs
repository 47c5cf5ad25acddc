//! Push delivery: one batched request per notification, whatever the provider.

pub mod dry_run;
pub mod expo;
pub mod fcm;

use std::{sync::Arc, time::Duration};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::PushCredentials;

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
}

/// What the provider told us about a delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryReport {
    Counted { success: usize, failure: usize },
    /// The provider accepted the request without per-device results.
    Accepted,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("push request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("push gateway answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("push delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("push delivery rejected: {0}")]
    Rejected(String),
    #[error("push provider authentication failed: {0}")]
    Auth(String),
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Provider specific address check, on top of [`crate::recipients::is_valid_address`].
    fn accepts(&self, _address: &str) -> bool {
        true
    }

    async fn deliver(&self, message: &PushMessage, recipients: &[String]) -> Result<DeliveryReport, TransportError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Empty recipient list, the transport was not called.
    Skipped,
    Delivered(DeliveryReport),
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

pub struct PushDispatcher {
    transport: Arc<dyn PushTransport>,
    timeout: Duration,
}

impl PushDispatcher {

    pub fn new(transport: Arc<dyn PushTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn accepts(&self, address: &str) -> bool {
        self.transport.accepts(address)
    }

    /// Sends `message` to every recipient in a single request. Failures are
    /// logged and reported, never returned as errors.
    pub async fn dispatch(&self, message: &PushMessage, recipients: &[String]) -> DispatchOutcome {
        if recipients.is_empty() {
            log::debug!("No recipient for \"{}\", nothing to send", message.title);
            return DispatchOutcome::Skipped;
        }

        let delivery = tokio::time::timeout(self.timeout, self.transport.deliver(message, recipients)).await;
        let error = match delivery {
            Ok(Ok(report)) => {
                match &report {
                    DeliveryReport::Counted { success, failure } =>
                        log::info!("Notification \"{}\" sent through {} to {} device(s), {} failed", message.title, self.transport.name(), success, failure),
                    DeliveryReport::Accepted =>
                        log::info!("Notification \"{}\" accepted by {} for {} device(s)", message.title, self.transport.name(), recipients.len()),
                }
                return DispatchOutcome::Delivered(report);
            },
            Ok(Err(error)) => error,
            Err(_) => TransportError::Timeout(self.timeout),
        };

        log::error!("Failed to send notification \"{}\" through {}: {}", message.title, self.transport.name(), error);
        DispatchOutcome::Failed(error.to_string())
    }

}

/// Picks the transport matching the configured credentials, logging only when there are none.
pub async fn transport_from_credentials(credentials: Option<&PushCredentials>, timeout: Duration) -> Result<Arc<dyn PushTransport>, TransportError> {
    let transport: Arc<dyn PushTransport> = match credentials {
        Some(PushCredentials::Fcm { service_account_file, project_id, endpoint }) =>
            Arc::new(fcm::FcmTransport::new(service_account_file.as_deref(), project_id.clone(), endpoint.clone(), timeout).await?),
        Some(PushCredentials::Expo { access_token, endpoint }) =>
            Arc::new(expo::ExpoTransport::new(access_token.clone(), endpoint.clone(), timeout)?),
        None => {
            log::warn!("No push credentials configured, notifications will only be logged");
            Arc::new(dry_run::DryRunTransport)
        },
    };
    Ok(transport)
}

//! Firebase Cloud Messaging through the HTTP v1 API.
//!
//! The v1 API has no multicast request: one message is sent per device
//! token, all of them concurrently, and the per-device answers are folded
//! into a single success/failure count.

use std::{path::Path, sync::Arc, time::Duration};
use async_trait::async_trait;
use futures::future::join_all;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde::{Deserialize, Serialize};

use super::{DeliveryReport, PushMessage, PushTransport, TransportError};

pub const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com";
pub const MESSAGING_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

pub fn send_url(endpoint: &str, project_id: &str) -> String {
    format!("{}/v1/projects/{}/messages:send", endpoint.trim_end_matches('/'), project_id)
}

#[derive(Serialize, Debug)]
pub struct SendRequest<'a> {
    pub message: Message<'a>,
}

#[derive(Serialize, Debug)]
pub struct Message<'a> {
    pub token: &'a str,
    pub notification: &'a PushMessage,
    pub android: AndroidConfig,
}

#[derive(Serialize, Debug)]
pub struct AndroidConfig {
    pub priority: &'static str,
}

impl<'a> SendRequest<'a> {
    pub fn new(token: &'a str, notification: &'a PushMessage) -> Self {
        Self {
            message: Message { token, notification, android: AndroidConfig { priority: "high" } },
        }
    }
}

#[derive(Deserialize, Debug)]
struct SendResponse {
    name: String,
}

/// Name of the message FCM created, as returned by a successful send.
pub fn parse_response(body: &str) -> Result<String, TransportError> {
    let response: SendResponse = serde_json::from_str(body)
        .map_err(|error| TransportError::Rejected(format!("unexpected FCM response: {}", error)))?;
    Ok(response.name)
}

/// Folds per-device results into one report, logging every failed device.
pub fn count_results(results: Vec<Result<String, TransportError>>) -> DeliveryReport {
    let mut success = 0;
    let mut failure = 0;
    for result in results {
        match result {
            Ok(name) => {
                log::debug!("FCM accepted message {}", name);
                success += 1;
            },
            Err(error) => {
                log::warn!("FCM device delivery failed: {}", error);
                failure += 1;
            },
        }
    }
    DeliveryReport::Counted { success, failure }
}

pub struct FcmTransport {
    client: reqwest::Client,
    token_provider: Arc<dyn TokenProvider>,
    url: String,
}

impl FcmTransport {

    /// Authenticates with `service_account_file`, or with the application
    /// default credentials when there is none. The project defaults to the
    /// one the credentials belong to.
    pub async fn new(service_account_file: Option<&Path>, project_id: Option<String>, endpoint: Option<String>, timeout: Duration) -> Result<Self, TransportError> {
        let token_provider: Arc<dyn TokenProvider> = match service_account_file {
            Some(path) => Arc::new(CustomServiceAccount::from_file(path)
                .map_err(|error| TransportError::Auth(format!("{}: {}", path.display(), error)))?),
            None => gcp_auth::provider().await
                .map_err(|error| TransportError::Auth(error.to_string()))?,
        };

        let project_id = match project_id {
            Some(project_id) => project_id,
            None => token_provider.project_id().await
                .map_err(|error| TransportError::Auth(format!("cannot find the Firebase project: {}", error)))?
                .to_string(),
        };

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url = send_url(endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT), &project_id);
        log::info!("Sending push notifications through {}", url);

        Ok(Self { client, token_provider, url })
    }

    async fn send(&self, access_token: &str, message: &PushMessage, recipient: &str) -> Result<String, TransportError> {
        let response = self.client.post(&self.url)
            .bearer_auth(access_token)
            .json(&SendRequest::new(recipient, message))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16(), body });
        }

        parse_response(&body)
    }

}

#[async_trait]
impl PushTransport for FcmTransport {
    fn name(&self) -> &'static str {
        "fcm"
    }

    async fn deliver(&self, message: &PushMessage, recipients: &[String]) -> Result<DeliveryReport, TransportError> {
        let access_token = self.token_provider.token(MESSAGING_SCOPES).await
            .map_err(|error| TransportError::Auth(error.to_string()))?;

        let sends = recipients.iter().map(|recipient| self.send(access_token.as_str(), message, recipient));
        Ok(count_results(join_all(sends).await))
    }
}

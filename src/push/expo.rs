//! Expo push gateway.
//!
//! The gateway takes either a single message object or an array of them and
//! answers with one ticket per message in the same shape. Each recipient gets
//! its own message so every ticket maps to one device.

use std::time::Duration;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{DeliveryReport, PushMessage, PushTransport, TransportError};

pub const DEFAULT_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";

lazy_static! {
    static ref EXPO_TOKEN_RE: Regex = Regex::new(r"^Expo(?:nent)?PushToken\[[^\]]+\]$").unwrap();
}

pub fn is_expo_token(token: &str) -> bool {
    EXPO_TOKEN_RE.is_match(token)
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct ExpoMessage<'a> {
    pub to: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub sound: &'static str,
    pub priority: &'static str,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum ExpoPayload<'a> {
    Single(ExpoMessage<'a>),
    Batch(Vec<ExpoMessage<'a>>),
}

impl<'a> ExpoPayload<'a> {
    pub fn new(message: &'a PushMessage, recipients: &'a [String]) -> Self {
        let mut messages: Vec<ExpoMessage<'a>> = recipients.iter().map(|to| ExpoMessage {
            to: to.as_str(),
            title: message.title.as_str(),
            body: message.body.as_str(),
            sound: "default",
            priority: "high",
        }).collect();

        if messages.len() == 1 {
            Self::Single(messages.remove(0))
        } else {
            Self::Batch(messages)
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq)]
pub struct ExpoTicket {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ExpoTickets {
    One(ExpoTicket),
    Many(Vec<ExpoTicket>),
}

#[derive(Deserialize, Debug)]
struct ExpoResponse {
    data: ExpoTickets,
}

/// Counts `ok` tickets; the others are logged with the gateway's reason.
pub fn parse_response(body: &str) -> Result<DeliveryReport, TransportError> {
    let response: ExpoResponse = serde_json::from_str(body)
        .map_err(|error| TransportError::Rejected(format!("unexpected Expo response: {}", error)))?;

    let tickets = match response.data {
        ExpoTickets::One(ticket) => vec![ticket],
        ExpoTickets::Many(tickets) => tickets,
    };

    let success = tickets.iter().filter(|ticket| ticket.status == "ok").count();
    for ticket in tickets.iter().filter(|ticket| ticket.status != "ok") {
        log::warn!("Expo rejected a notification: {}", ticket.message.as_deref().unwrap_or("no reason given"));
    }

    Ok(DeliveryReport::Counted { success, failure: tickets.len() - success })
}

pub struct ExpoTransport {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl ExpoTransport {
    pub fn new(access_token: Option<String>, endpoint: Option<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned()),
            access_token,
        })
    }
}

#[async_trait]
impl PushTransport for ExpoTransport {
    fn name(&self) -> &'static str {
        "expo"
    }

    fn accepts(&self, address: &str) -> bool {
        is_expo_token(address)
    }

    async fn deliver(&self, message: &PushMessage, recipients: &[String]) -> Result<DeliveryReport, TransportError> {
        let payload = ExpoPayload::new(message, recipients);

        let mut request = self.client.post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload);
        if let Some(access_token) = &self.access_token {
            request = request.bearer_auth(access_token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16(), body });
        }

        parse_response(&body)
    }
}

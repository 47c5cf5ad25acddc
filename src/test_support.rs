use std::sync::Mutex;
use async_trait::async_trait;

use crate::compartments::{Volume, Volumes};
use crate::push::{DeliveryReport, PushMessage, PushTransport, TransportError};
use crate::recipients::{DirectoryError, Recipient, RecipientDirectory};

pub fn volumes(entries: &[(&str, Volume)]) -> Volumes {
    entries.iter().map(|(compartment, volume)| (*compartment, *volume)).collect()
}

/// Records every delivery, failing those whose title contains `failing_on`.
#[derive(Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<(PushMessage, Vec<String>)>>,
    failing_on: Option<String>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(title_fragment: &str) -> Self {
        Self { failing_on: Some(title_fragment.to_owned()), ..Self::default() }
    }

    pub fn deliveries(&self) -> Vec<(PushMessage, Vec<String>)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, message: &PushMessage, recipients: &[String]) -> Result<DeliveryReport, TransportError> {
        self.deliveries.lock().unwrap().push((message.clone(), recipients.to_vec()));
        match &self.failing_on {
            Some(fragment) if message.title.contains(fragment.as_str()) =>
                Err(TransportError::Rejected(format!("refusing {}", message.title))),
            _ => Ok(DeliveryReport::Counted { success: recipients.len(), failure: 0 }),
        }
    }
}

pub struct FailingDirectory;

#[async_trait]
impl RecipientDirectory for FailingDirectory {
    async fn register(&self, _recipient: Recipient) -> Result<(), DirectoryError> {
        Err(DirectoryError::Unavailable("directory offline".to_owned()))
    }

    async fn recipients(&self) -> Result<Vec<Recipient>, DirectoryError> {
        Err(DirectoryError::Unavailable("directory offline".to_owned()))
    }
}

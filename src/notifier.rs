//! Turns volume updates into push notifications.
//!
//! The [`Notifier`] is the only writer of the per-compartment state. Every
//! update batch is evaluated under one lock so two batches touching the same
//! compartment cannot interleave, then the lock is released and the firing
//! compartments are notified concurrently. A failed delivery for one
//! compartment has no effect on the others.

use std::{collections::{HashMap, HashSet}, sync::Arc, time::Duration};
use derive_more::{Deref, DerefMut};
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::compartments::{CompartmentId, CompartmentReading, CompartmentState, Evaluator, Volume, Volumes};
use crate::config::{Config, MessageTemplates};
use crate::feed::{Subscription, VolumeFeed};
use crate::push::{DispatchOutcome, PushDispatcher, PushMessage};
use crate::recipients::{is_valid_address, RecipientDirectory};
use crate::time::Timestamp;

#[derive(Default, Deref, DerefMut)]
pub struct CompartmentStates(HashMap<CompartmentId, CompartmentState>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationEvent {
    pub compartment: CompartmentId,
    pub volume: Volume,
    pub message: PushMessage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Nobody to notify, the dispatcher was not called.
    NoRecipients,
    Dispatched { recipients: usize, outcome: DispatchOutcome },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationReport {
    pub event: NotificationEvent,
    pub outcome: NotificationOutcome,
}

pub struct Notifier {
    evaluator: Evaluator,
    compartments: Vec<CompartmentId>,
    templates: MessageTemplates,
    states: Mutex<CompartmentStates>,
    feed: Arc<dyn VolumeFeed>,
    directory: Arc<dyn RecipientDirectory>,
    dispatcher: PushDispatcher,
}

impl Notifier {

    pub fn new(config: &Config, feed: Arc<dyn VolumeFeed>, directory: Arc<dyn RecipientDirectory>, dispatcher: PushDispatcher) -> Self {
        Self {
            evaluator: Evaluator::new(config.threshold, config.policy),
            compartments: config.compartments.clone(),
            templates: config.messages.clone(),
            states: Mutex::new(CompartmentStates::default()),
            feed,
            directory,
            dispatcher,
        }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// State of every watched compartment, in configuration order.
    pub async fn states(&self) -> Vec<(CompartmentId, CompartmentState)> {
        let states = self.states.lock().await;
        self.compartments.iter()
            .map(|compartment| (compartment.clone(), states.get(compartment).cloned().unwrap_or_default()))
            .collect()
    }

    pub async fn handle_update(&self, update: &Volumes) -> Vec<NotificationReport> {
        let fired = self.evaluate(update, Timestamp::now()).await;
        join_all(fired.into_iter().map(|reading| self.notify(reading))).await
    }

    /// Evaluates the whole current feed snapshot at once.
    pub async fn run_now(&self) -> Vec<NotificationReport> {
        match self.feed.snapshot().await {
            Ok(Some(snapshot)) => self.handle_update(&snapshot).await,
            Ok(None) => {
                log::info!("No compartment data available, nothing to check");
                Vec::new()
            },
            Err(error) => {
                log::error!("Failed to read compartment volumes: {}", error);
                Vec::new()
            },
        }
    }

    /// Handles updates in the order the feed delivers them, until the subscription ends.
    pub async fn run(self: Arc<Self>, mut subscription: Subscription) {
        while let Some(update) = subscription.next().await {
            self.handle_update(&update).await;
        }
        log::info!("Volume feed subscription closed");
    }

    pub async fn sweep_every(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            log::debug!("Periodic compartment sweep");
            self.run_now().await;
        }
    }

    async fn evaluate(&self, update: &Volumes, now: Timestamp) -> Vec<CompartmentReading> {
        let mut states = self.states.lock().await;
        let mut fired = Vec::new();

        for reading in update.readings() {
            if !self.compartments.contains(&reading.compartment) {
                log::debug!("Ignoring reading for unwatched compartment {}", reading.compartment);
                continue;
            }

            let state = states.entry(reading.compartment.clone()).or_default();
            let evaluation = self.evaluator.evaluate(state, &reading, now);
            *state = evaluation.state;

            if evaluation.fire {
                log::info!("Compartment {} reached {}% (threshold {}%)", reading.compartment, reading.volume, self.evaluator.threshold());
                fired.push(reading);
            } else {
                log::debug!("Compartment {} at {}%, no notification", reading.compartment, reading.volume);
            }
        }

        fired
    }

    async fn notify(&self, reading: CompartmentReading) -> NotificationReport {
        let event = NotificationEvent {
            message: self.templates.render(&reading),
            compartment: reading.compartment,
            volume: reading.volume,
        };

        let addresses = self.addresses().await;
        if addresses.is_empty() {
            log::warn!("No device token registered, \"{}\" not sent", event.message.title);
            return NotificationReport { event, outcome: NotificationOutcome::NoRecipients };
        }

        let outcome = self.dispatcher.dispatch(&event.message, &addresses).await;
        NotificationReport {
            event,
            outcome: NotificationOutcome::Dispatched { recipients: addresses.len(), outcome },
        }
    }

    /// Fresh list of deliverable addresses, without duplicates.
    async fn addresses(&self) -> Vec<String> {
        let recipients = match self.directory.recipients().await {
            Ok(recipients) => recipients,
            Err(error) => {
                log::error!("Failed to read recipient tokens: {}", error);
                return Vec::new();
            },
        };

        let mut seen = HashSet::new();
        recipients.into_iter()
            .map(|recipient| recipient.token)
            .filter(|token| {
                let deliverable = is_valid_address(token) && self.dispatcher.accepts(token);
                if !deliverable {
                    log::warn!("Skipping invalid push token {:?}", token);
                }
                deliverable
            })
            .filter(|token| seen.insert(token.clone()))
            .collect()
    }

}

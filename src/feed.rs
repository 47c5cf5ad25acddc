//! Volume feed: where compartment readings come from.
//!
//! A feed publishes two kinds of messages. A snapshot carries the whole
//! `compartment -> volume` mapping (or `null` when the store is empty),
//! a change carries the volume of a single compartment. Both end up as a
//! [`Volumes`] batch on a [`Subscription`], and the latest merged view is
//! kept by [`LatestVolumes`] so a full sweep can be run at any time.

use std::sync::Arc;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::compartments::{CompartmentId, Volume, Volumes};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid JSON payload on topic {topic}: {source}")]
    InvalidJson {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected payload shape on topic {topic}: {payload}")]
    UnexpectedShape { topic: String, payload: serde_json::Value },
    #[error("unexpected volume value for compartment {compartment}: {value}")]
    InvalidVolume { compartment: String, value: serde_json::Value },
    #[error("volume feed unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait VolumeFeed: Send + Sync {
    /// Full current view of the feed, `None` when nothing was ever published.
    async fn snapshot(&self) -> Result<Option<Volumes>, FeedError>;
}

/// One decoded feed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    Snapshot(Volumes),
    Changes(Volumes),
}

/// Decodes a message published under `feed_topic`.
///
/// `Ok(None)` means there is nothing to evaluate: a `null` snapshot, a
/// removed compartment or a topic outside of the feed.
pub fn parse_publish(feed_topic: &str, topic: &str, payload: &[u8]) -> Result<Option<FeedUpdate>, FeedError> {
    if topic == feed_topic {
        let value = parse_json(topic, payload)?;
        return match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Object(_) => Ok(parse_volumes(topic, &value)?.map(FeedUpdate::Snapshot)),
            payload => Err(FeedError::UnexpectedShape { topic: topic.to_owned(), payload }),
        };
    }

    let compartment = match topic.strip_prefix(feed_topic).and_then(|rest| rest.strip_prefix('/')) {
        Some(compartment) if !compartment.is_empty() && !compartment.contains('/') => compartment,
        _ => return Ok(None),
    };

    let value = parse_json(topic, payload)?;
    Ok(volume_from_value(compartment, &value)?.map(|volume| {
        FeedUpdate::Changes([(compartment, volume)].into_iter().collect())
    }))
}

fn parse_json(topic: &str, payload: &[u8]) -> Result<serde_json::Value, FeedError> {
    serde_json::from_slice(payload).map_err(|source| FeedError::InvalidJson { topic: topic.to_owned(), source })
}

/// Converts a JSON object into volumes, skipping compartments whose value cannot be read.
pub fn parse_volumes(topic: &str, value: &serde_json::Value) -> Result<Option<Volumes>, FeedError> {
    let object = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Object(object) => object,
        payload => return Err(FeedError::UnexpectedShape { topic: topic.to_owned(), payload: payload.clone() }),
    };

    let mut volumes = Volumes::new();
    for (compartment, value) in object {
        match volume_from_value(compartment, value) {
            Ok(Some(volume)) => { volumes.insert(CompartmentId::new(compartment.as_str()), volume); },
            Ok(None) => {},
            Err(error) => log::error!("{}", error),
        }
    }
    Ok(Some(volumes))
}

/// Sensors report integers but the store may hold floats or numeric strings.
pub fn volume_from_value(compartment: &str, value: &serde_json::Value) -> Result<Option<Volume>, FeedError> {
    let invalid = || FeedError::InvalidVolume { compartment: compartment.to_owned(), value: value.clone() };
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(volume) => Ok(Some(volume)),
            None => number.as_f64().map(|volume| Some(volume.round() as Volume)).ok_or_else(invalid),
        },
        serde_json::Value::String(text) => text.trim().parse::<f64>()
            .map(|volume| Some(volume.round() as Volume))
            .map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Latest known volume of every compartment, shared between the feed pump and sweeps.
#[derive(Clone, Default)]
pub struct LatestVolumes(Arc<RwLock<Option<Volumes>>>);

impl LatestVolumes {

    pub fn new() -> Self {
        Self::default()
    }

    /// Records `update` and returns the compartments it actually changed.
    pub async fn apply(&self, update: FeedUpdate) -> Option<Volumes> {
        let mut latest = self.0.write().await;
        let changed = match update {
            FeedUpdate::Snapshot(snapshot) => {
                let previous: Option<&Volumes> = (*latest).as_ref();
                let changed: Volumes = snapshot.iter()
                    .filter(|(compartment, volume)| {
                        previous.and_then(|previous| previous.get(*compartment)) != Some(*volume)
                    })
                    .map(|(compartment, volume)| (compartment.clone(), *volume))
                    .collect();
                *latest = Some(snapshot);
                changed
            },
            FeedUpdate::Changes(changes) => {
                latest.get_or_insert_with(Volumes::new).merge(&changes);
                changes
            },
        };
        if changed.is_empty() { None } else { Some(changed) }
    }

}

#[async_trait]
impl VolumeFeed for LatestVolumes {
    async fn snapshot(&self) -> Result<Option<Volumes>, FeedError> {
        Ok(self.0.read().await.clone())
    }
}

/// Ordered stream of volume updates. Dropping or cancelling it stops the task feeding it.
pub struct Subscription {
    updates: mpsc::Receiver<Volumes>,
    pump: Option<JoinHandle<()>>,
}

impl Subscription {

    pub fn new(updates: mpsc::Receiver<Volumes>, pump: Option<JoinHandle<()>>) -> Self {
        Self { updates, pump }
    }

    /// Subscription fed by hand through the returned sender.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Volumes>, Self) {
        let (sender, updates) = mpsc::channel(capacity);
        (sender, Self::new(updates, None))
    }

    pub async fn next(&mut self) -> Option<Volumes> {
        self.updates.recv().await
    }

    pub fn cancel(mut self) {
        self.stop_pump();
    }

    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.updates.close();
    }

}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::volumes;

    #[test]
    fn snapshot_object_is_parsed() {
        let update = parse_publish("compartments", "compartments", br#"{"botol":45,"kaleng":82.6,"kertas":"12"}"#).unwrap();
        assert_eq!(update, Some(FeedUpdate::Snapshot(volumes(&[("botol", 45), ("kaleng", 83), ("kertas", 12)]))));
    }

    #[test]
    fn null_snapshot_is_nothing_to_evaluate() {
        assert_eq!(parse_publish("compartments", "compartments", b"null").unwrap(), None);
    }

    #[test]
    fn invalid_compartment_values_are_skipped() {
        let update = parse_publish("compartments", "compartments", br#"{"botol":true,"kaleng":90,"kertas":null}"#).unwrap();
        assert_eq!(update, Some(FeedUpdate::Snapshot(volumes(&[("kaleng", 90)]))));
    }

    #[test]
    fn single_compartment_topic_is_a_change() {
        let update = parse_publish("compartments", "compartments/botol", b"82").unwrap();
        assert_eq!(update, Some(FeedUpdate::Changes(volumes(&[("botol", 82)]))));
    }

    #[test]
    fn unrelated_topics_are_ignored() {
        assert_eq!(parse_publish("compartments", "other/botol", b"82").unwrap(), None);
        assert_eq!(parse_publish("compartments", "compartments/botol/raw", b"82").unwrap(), None);
        assert_eq!(parse_publish("compartments", "compartmentsx", b"82").unwrap(), None);
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(matches!(parse_publish("compartments", "compartments", b"{not json"), Err(FeedError::InvalidJson { .. })));
        assert!(matches!(parse_publish("compartments", "compartments", b"[1,2]"), Err(FeedError::UnexpectedShape { .. })));
        assert!(matches!(parse_publish("compartments", "compartments/botol", b"\"full\""), Err(FeedError::InvalidVolume { .. })));
    }

    #[tokio::test]
    async fn snapshot_reports_only_changed_compartments() {
        let latest = LatestVolumes::new();
        assert_eq!(latest.snapshot().await.unwrap(), None);

        let first = latest.apply(FeedUpdate::Snapshot(volumes(&[("botol", 45), ("kaleng", 10)]))).await;
        assert_eq!(first, Some(volumes(&[("botol", 45), ("kaleng", 10)])));

        let second = latest.apply(FeedUpdate::Snapshot(volumes(&[("botol", 82), ("kaleng", 10)]))).await;
        assert_eq!(second, Some(volumes(&[("botol", 82)])));

        let unchanged = latest.apply(FeedUpdate::Snapshot(volumes(&[("botol", 82), ("kaleng", 10)]))).await;
        assert_eq!(unchanged, None);
    }

    #[tokio::test]
    async fn changes_are_merged_into_snapshot() {
        let latest = LatestVolumes::new();
        latest.apply(FeedUpdate::Snapshot(volumes(&[("botol", 45), ("kaleng", 10)]))).await;
        latest.apply(FeedUpdate::Changes(volumes(&[("kaleng", 95)]))).await;
        assert_eq!(latest.snapshot().await.unwrap(), Some(volumes(&[("botol", 45), ("kaleng", 95)])));
    }

    #[tokio::test]
    async fn subscription_preserves_order() {
        let (sender, mut subscription) = Subscription::channel(4);
        sender.send(volumes(&[("botol", 1)])).await.unwrap();
        sender.send(volumes(&[("botol", 2)])).await.unwrap();
        drop(sender);
        assert_eq!(subscription.next().await, Some(volumes(&[("botol", 1)])));
        assert_eq!(subscription.next().await, Some(volumes(&[("botol", 2)])));
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn cancelled_subscription_closes_the_channel() {
        let (sender, updates) = mpsc::channel::<Volumes>(1);
        let pump_sender = sender.clone();
        let pump = tokio::spawn(async move {
            let _sender = pump_sender;
            std::future::pending::<()>().await;
        });
        let subscription = Subscription::new(updates, Some(pump));
        subscription.cancel();
        assert!(sender.is_closed());
    }
}

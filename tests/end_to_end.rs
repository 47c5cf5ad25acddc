use std::{sync::{Arc, Mutex}, time::Duration};
use async_trait::async_trait;

use pantaubin_notifier::compartments::Volumes;
use pantaubin_notifier::config::Config;
use pantaubin_notifier::feed::{self, LatestVolumes, Subscription};
use pantaubin_notifier::notifier::Notifier;
use pantaubin_notifier::push::{DeliveryReport, PushDispatcher, PushMessage, PushTransport, TransportError};
use pantaubin_notifier::recipients::{MemoryDirectory, Recipient, RecipientDirectory};

#[derive(Default)]
struct Recorder(Mutex<Vec<(PushMessage, Vec<String>)>>);

#[async_trait]
impl PushTransport for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn deliver(&self, message: &PushMessage, recipients: &[String]) -> Result<DeliveryReport, TransportError> {
        self.0.lock().unwrap().push((message.clone(), recipients.to_vec()));
        Ok(DeliveryReport::Counted { success: recipients.len(), failure: 0 })
    }
}

async fn publish(latest: &LatestVolumes, sender: &tokio::sync::mpsc::Sender<Volumes>, payload: &str) {
    let update = feed::parse_publish("compartments", "compartments", payload.as_bytes()).unwrap();
    if let Some(changed) = latest.apply(update.unwrap()).await {
        sender.send(changed).await.unwrap();
    }
}

#[tokio::test]
async fn bottle_compartment_fills_empties_and_fills_again() {
    let directory = Arc::new(MemoryDirectory::new());
    directory.register(Recipient::new("alice", "token-a")).await.unwrap();
    directory.register(Recipient::new("bob", "token-b")).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let latest = LatestVolumes::new();
    let notifier = Arc::new(Notifier::new(
        &Config::default(),
        Arc::new(latest.clone()),
        directory,
        PushDispatcher::new(recorder.clone(), Duration::from_secs(10)),
    ));

    let (sender, subscription) = Subscription::channel(16);
    let running = tokio::spawn(notifier.clone().run(subscription));

    publish(&latest, &sender, r#"{"botol":45}"#).await;
    publish(&latest, &sender, r#"{"botol":82}"#).await;
    publish(&latest, &sender, r#"{"botol":88}"#).await;
    publish(&latest, &sender, r#"{"botol":60}"#).await;
    publish(&latest, &sender, r#"{"botol":81}"#).await;
    drop(sender);
    running.await.unwrap();

    let deliveries = recorder.0.lock().unwrap().clone();
    assert_eq!(deliveries.len(), 2);

    let (message, recipients) = &deliveries[0];
    assert_eq!(message.title, "Kompartemen Botol Penuh!");
    assert!(message.body.contains("82%"));
    assert_eq!(recipients, &vec!["token-a".to_owned(), "token-b".to_owned()]);

    assert!(deliveries[1].0.body.contains("81%"));

    let states = notifier.states().await;
    assert_eq!(states[0].1.last_volume, Some(81));
}

#[tokio::test]
async fn null_snapshot_and_empty_directory_are_quiet() {
    let recorder = Arc::new(Recorder::default());
    let latest = LatestVolumes::new();
    let notifier = Notifier::new(
        &Config::default(),
        Arc::new(latest.clone()),
        Arc::new(MemoryDirectory::new()),
        PushDispatcher::new(recorder.clone(), Duration::from_secs(10)),
    );

    assert_eq!(feed::parse_publish("compartments", "compartments", b"null").unwrap(), None);
    assert!(notifier.run_now().await.is_empty());

    let update = feed::parse_publish("compartments", "compartments/kaleng", b"97").unwrap().unwrap();
    latest.apply(update).await;
    let reports = notifier.run_now().await;

    assert_eq!(reports.len(), 1);
    assert!(recorder.0.lock().unwrap().is_empty());
}

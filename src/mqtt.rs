use rumqttc::{MqttOptions, AsyncClient, QoS, Event, Packet, EventLoop};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::feed::{self, FeedError, LatestVolumes, Subscription};

const UPDATES_CAPACITY: usize = 32;

pub async fn init(config: &Config) -> Result<(AsyncClient, EventLoop), FeedError> {
    let broker = &config.mqtt_broker;
    let mut mqtt_options = MqttOptions::new(config.mqtt_client_id.as_str(), broker.hostname.as_str(), broker.port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(5));
    // the broker keeps our subscriptions across reconnections
    mqtt_options.set_clean_session(false);

    let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

    for subscribe_pattern in config.feed_subscribe_patterns() {
        client.subscribe(subscribe_pattern.as_str(), QoS::AtLeastOnce).await
            .map_err(|error| FeedError::Unavailable(format!("cannot subscribe to {}: {}", subscribe_pattern, error)))?;
    }

    log::info!("Watching compartment volumes on mqtt://{}:{}/{}", broker.hostname, broker.port, config.feed_topic);
    Ok((client, event_loop))
}

/// Drives the MQTT event loop in the background. Every message that changes
/// a compartment's volume is recorded in `latest` and sent on the returned subscription.
pub fn subscribe(mut event_loop: EventLoop, feed_topic: String, latest: LatestVolumes) -> Subscription {
    let (updates_tx, updates_rx) = mpsc::channel(UPDATES_CAPACITY);

    let pump = tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    log::debug!("topic: {}, payload: {:?}", publish.topic, publish.payload);
                    match feed::parse_publish(&feed_topic, &publish.topic, &publish.payload) {
                        Ok(Some(update)) => {
                            if let Some(changed) = latest.apply(update).await {
                                if updates_tx.send(changed).await.is_err() {
                                    break;
                                }
                            }
                        },
                        Ok(None) => log::info!("No compartment data on {}", publish.topic),
                        Err(error) => log::error!("Error processing compartment update: {}", error),
                    }
                },
                Ok(Event::Incoming(Packet::ConnAck(_))) => log::info!("Connected to MQTT broker"),
                Ok(_) => {},
                Err(mqtt_connection_error) => {
                    log::error!("mqtt connection error: {}", mqtt_connection_error);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                },
            }
        }
        log::info!("Volume feed subscriber gone, stopping MQTT event loop");
    });

    Subscription::new(updates_rx, Some(pump))
}

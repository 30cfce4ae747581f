use crate::prelude::*;
use crate::stats::SharedStats;

use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, Publish, QoS};

const LWT_TOPIC: &str = "hello/cgateweb";

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

/// MQTT client wrapper: connect with LWT, subscribe to the bridge's write
/// topics, and run the inbound/outbound halves concurrently. Grounded on
/// the teacher's `mqtt::Mqtt` almost directly (`rumqttc` setup, the
/// `try_join!(setup, receiver, sender)` split), with the topic namespace
/// swapped from the teacher's per-inverter subscriptions to the bridge's
/// `cbus/write/#` wildcard.
#[derive(Clone)]
pub struct Mqtt {
    settings: SettingsWrapper,
    channels: Channels,
    stats: SharedStats,
}

impl Mqtt {
    pub fn new(settings: SettingsWrapper, channels: Channels, stats: SharedStats) -> Self {
        Self { settings, channels, stats }
    }

    pub async fn start(&self) -> Result<()> {
        let mqtt = self.settings.mqtt();

        let mut options = MqttOptions::new(mqtt.client_id.clone(), broker_host(&mqtt.broker)?, broker_port(&mqtt.broker)?);

        let will = LastWill {
            topic: LWT_TOPIC.to_string(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);
        options.set_keep_alive(std::time::Duration::from_secs(60));

        if let (Some(u), Some(p)) = (&mqtt.username, &mqtt.password) {
            options.set_credentials(u, p);
        }

        info!("connecting to mqtt broker at {}", mqtt.broker);

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client),
        )?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("stopping mqtt client");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        Ok(())
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client.publish(LWT_TOPIC, QoS::AtLeastOnce, true, "online").await?;
        client.subscribe("cbus/write/#", QoS::AtMostOnce).await?;
        Ok(())
    }

    // mqtt -> router
    async fn receiver(&self, mut eventloop: rumqttc::EventLoop) -> Result<()> {
        let mut shutdown = self.channels.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("mqtt receiver shutting down");
                    return Ok(());
                }
                event = tokio::time::timeout(std::time::Duration::from_secs(1), eventloop.poll()) => {
                    match event {
                        Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => {
                            self.handle_message(publish)?;
                        }
                        Ok(Err(e)) => {
                            error!("mqtt eventloop error: {}", e);
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                        _ => {} // timeout tick or other incoming/outgoing events
                    }
                }
            }
        }
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        let message = Message {
            topic: publish.topic,
            retain: publish.retain,
            payload: String::from_utf8(publish.payload.to_vec())?,
        };
        debug!("RX: {:?}", message);
        if self.channels.from_mqtt.send(ChannelData::Message(message)).is_err() {
            bail!("mqtt.rs:send(from_mqtt) failed - channel closed?");
        }
        Ok(())
    }

    // publisher -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();
        let mut shutdown = self.channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("mqtt sender shutting down");
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                data = receiver.recv() => {
                    match data? {
                        Shutdown => {
                            let _ = client.disconnect().await;
                            return Ok(());
                        }
                        Message(message) => self.publish_with_retry(&client, message).await,
                    }
                }
            }
        }
    }

    async fn publish_with_retry(&self, client: &AsyncClient, message: Message) {
        const MAX_ATTEMPTS: u32 = 3;
        let mut attempt = 0;

        loop {
            match client
                .publish(&message.topic, QoS::AtLeastOnce, message.retain, message.payload.as_bytes())
                .await
            {
                Ok(()) => {
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.mqtt_messages_sent += 1;
                    }
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.mqtt_publish_failures += 1;
                    }
                    if attempt >= MAX_ATTEMPTS {
                        error!("giving up publishing to {} after {} attempts: {}", message.topic, attempt, e);
                        return;
                    }
                    warn!("publish to {} failed ({}), retrying: {}", message.topic, attempt, e);
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    }
}

fn broker_host(broker: &str) -> Result<String> {
    Ok(broker.rsplit_once(':').map(|(h, _)| h).unwrap_or(broker).to_string())
}

fn broker_port(broker: &str) -> Result<u16> {
    match broker.rsplit_once(':') {
        Some((_, port)) => port.parse().map_err(|e| anyhow!("mqtt.rs:invalid broker port: {}", e)),
        None => Ok(1883),
    }
}

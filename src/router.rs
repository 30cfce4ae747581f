use crate::correlator::Correlator;
use crate::discovery::DiscoverRequest;
use crate::prelude::*;
use crate::protocol::{command, mqtt_topic};
use crate::queue::ThrottledQueue;
use crate::stats::SharedStats;

use std::sync::Arc;

/// Maps inbound MQTT topics to encoded C-Gate commands and enqueues them,
/// or to bridge-internal actions (relative-level adjustment, discovery
/// trigger). Grounded on the teacher's `mqtt::Message::to_command` dispatch
/// combined with `coordinator::process_message`'s per-kind handling.
pub struct Router {
    settings: SettingsWrapper,
    channels: Channels,
    queue: Arc<ThrottledQueue>,
    correlator: Arc<Correlator>,
    stats: SharedStats,
}

impl Router {
    pub fn new(
        settings: SettingsWrapper,
        channels: Channels,
        queue: Arc<ThrottledQueue>,
        correlator: Arc<Correlator>,
        stats: SharedStats,
    ) -> Self {
        Self { settings, channels, queue, correlator, stats }
    }

    pub async fn run(self) -> Result<()> {
        let mut receiver = self.channels.from_mqtt.subscribe();
        let mut shutdown = self.channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("router shutting down");
                    return Ok(());
                }
                data = receiver.recv() => {
                    use crate::mqtt::ChannelData::*;
                    match data? {
                        Shutdown => return Ok(()),
                        Message(message) => {
                            if let Err(e) = self.handle(&message.topic, &message.payload).await {
                                warn!("dropping mqtt message on {}: {}", message.topic, e);
                                if let Ok(mut stats) = self.stats.lock() {
                                    stats.commands_dropped += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle(&self, topic: &str, payload: &str) -> Result<()> {
        let cmd = mqtt_topic::parse(topic, payload)?;
        let project = self.settings.cgate_project();

        match cmd {
            command::Command::Announce => {
                let _ = self.channels.discover.send(DiscoverRequest::All);
                Ok(())
            }
            command::Command::Increase { address } => {
                self.spawn_relative_adjust(address, true, project);
                Ok(())
            }
            command::Command::Decrease { address } => {
                self.spawn_relative_adjust(address, false, project);
                Ok(())
            }
            command::Command::GetTree { network } => {
                self.spawn_tree_request(network);
                Ok(())
            }
            other => {
                let encoded = command::encode(&other, &project)
                    .ok_or_else(|| anyhow!("router.rs:command has no direct encoding"))?;
                self.queue.push(encoded);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.commands_encoded += 1;
                }
                Ok(())
            }
        }
    }

    /// Runs the relative-level flow (§4.3) on its own task so a slow or
    /// rejected adjustment can't stall the router's handling of other
    /// inbound MQTT commands for the duration of the 5s correlation wait.
    fn spawn_relative_adjust(&self, address: crate::address::GroupAddress, increase: bool, project: String) {
        let correlator = self.correlator.clone();
        let queue = self.queue.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            if let Err(e) = correlator.adjust_relative(address, increase, &queue, &project).await {
                warn!("relative-level adjust for {} failed: {}", address, e);
                if let Ok(mut stats) = stats.lock() {
                    stats.commands_dropped += 1;
                }
            }
        });
    }

    /// Requests `TREEXML <network>` directly (bypassing the discovery
    /// engine's classification), collects and parses the response, and
    /// publishes the `cbus/read/N///tree` JSON representation (§6).
    fn spawn_tree_request(&self, network: u8) {
        let channels = self.channels.clone();
        let queue = self.queue.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let result = async {
                let xml = crate::discovery::tree::request_tree_xml(
                    &channels,
                    &queue,
                    network,
                    crate::discovery::TREE_TIMEOUT,
                )
                .await?;
                let groups = crate::discovery::tree::parse(&xml, network)?;
                serde_json::to_string(&groups).map_err(|e| anyhow!("router.rs:failed to serialize tree: {}", e))
            }
            .await;

            match result {
                Ok(json) => {
                    let message = crate::mqtt::Message {
                        topic: format!("cbus/read/{}///tree", network),
                        retain: false,
                        payload: json,
                    };
                    if channels.to_mqtt.send(crate::mqtt::ChannelData::Message(message)).is_err() {
                        warn!("to_mqtt channel closed, dropping tree publish for network {}", network);
                    }
                }
                Err(e) => {
                    warn!("gettree for network {} failed: {}", network, e);
                    if let Ok(mut stats) = stats.lock() {
                        stats.commands_dropped += 1;
                    }
                }
            }
        });
    }
}

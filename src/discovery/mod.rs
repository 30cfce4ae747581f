pub mod classify;
pub mod config_payload;
pub mod label_map;
pub mod tree;

use crate::prelude::*;
use crate::queue::ThrottledQueue;
use crate::stats::SharedStats;

use label_map::LabelMap;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A request to (re)run discovery, either for every configured network or
/// for one specific network (e.g. triggered by the operator naming a
/// single network in a future extension of `bridge/announce`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverRequest {
    All,
    Network(u8),
}

#[cfg(not(feature = "mocks"))]
pub(crate) const TREE_TIMEOUT: Duration = Duration::from_secs(15);
#[cfg(feature = "mocks")]
pub(crate) const TREE_TIMEOUT: Duration = Duration::from_millis(100); // fail fast in tests

/// Runs the discovery engine: waits for `DiscoverRequest`s on
/// `channels.discover` and walks each named network's TREEXML, publishing
/// one retained config message per classified group. Grounded on the
/// teacher's long-running `run()` loop shape (subscribe, select against
/// shutdown, dispatch), generalized from polling register reads to
/// on-demand tree walks.
pub struct Engine {
    settings: SettingsWrapper,
    channels: Channels,
    queue: Arc<ThrottledQueue>,
    stats: SharedStats,
    label_map: Arc<LabelMap>,
    in_flight: Mutex<HashSet<u8>>,
}

impl Engine {
    pub fn new(
        settings: SettingsWrapper,
        channels: Channels,
        queue: Arc<ThrottledQueue>,
        stats: SharedStats,
    ) -> Arc<Self> {
        let label_map = settings
            .discovery()
            .label_file
            .as_deref()
            .map(|path| match LabelMap::load(path) {
                Ok(map) => map,
                Err(e) => {
                    warn!("discovery/mod.rs:failed to load label map {}: {}, continuing without it", path, e);
                    LabelMap::default()
                }
            })
            .unwrap_or_default();

        Arc::new(Self {
            settings,
            channels,
            queue,
            stats,
            label_map: Arc::new(label_map),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut receiver = self.channels.discover.subscribe();
        let mut shutdown = self.channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("discovery shutting down");
                    return Ok(());
                }
                request = receiver.recv() => {
                    let networks = self.networks_for(request?);
                    for network in networks {
                        self.clone().spawn_network_walk(network);
                    }
                }
            }
        }
    }

    fn networks_for(&self, request: DiscoverRequest) -> Vec<u8> {
        match request {
            DiscoverRequest::All => self.settings.discovery().networks,
            DiscoverRequest::Network(n) => vec![n],
        }
    }

    /// Coalesces concurrent requests for the same network: if a walk is
    /// already in flight, the new request is dropped rather than queued,
    /// since the in-flight walk will itself publish current state.
    fn spawn_network_walk(self: Arc<Self>, network: u8) {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(network) {
                debug!("discovery already running for network {}, skipping", network);
                return;
            }
        }

        tokio::spawn(async move {
            if let Err(e) = self.walk_network(network).await {
                warn!("discovery walk for network {} failed: {}", network, e);
            }
            self.in_flight.lock().unwrap().remove(&network);
        });
    }

    async fn walk_network(&self, network: u8) -> Result<()> {
        let xml = tree::request_tree_xml(&self.channels, &self.queue, network, TREE_TIMEOUT).await?;
        let groups = tree::parse(&xml, network)?;
        let discovery = self.settings.discovery();
        let prefix = discovery.prefix.clone();

        for group in groups {
            let address = GroupAddress::new(group.network, group.application, group.group);

            if self.label_map.exclude.contains(&address) {
                continue;
            }

            let class = match self
                .label_map
                .type_overrides
                .get(&address)
                .copied()
                .or_else(|| classify::classify(group.application, &discovery))
            {
                Some(class) => class,
                None => continue,
            };

            let label = self.label_map.labels.get(&address).map(String::as_str);
            let name = config_payload::display_name(&group, label);
            let payload = config_payload::build(class, address, &name);
            let topic = config_payload::config_topic(&prefix, class, address);

            let message = crate::mqtt::Message {
                topic,
                retain: true,
                payload: payload.to_string(),
            };
            if self.channels.to_mqtt.send(crate::mqtt::ChannelData::Message(message)).is_err() {
                warn!("to_mqtt channel closed mid-discovery for network {}", network);
                break;
            }
            if let Ok(mut stats) = self.stats.lock() {
                stats.discovery_groups_published += 1;
            }
        }

        Ok(())
    }
}

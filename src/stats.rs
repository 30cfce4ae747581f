use std::sync::{Arc, Mutex};

/// Process-lifetime counters, mirroring the shape of a packet-stats struct:
/// a plain counter bag behind a mutex, incremented inline at call sites that
/// already hold the relevant lock.
#[derive(Debug, Default, Clone)]
pub struct BridgeStats {
    pub events_parsed: u64,
    pub events_dropped: u64,
    pub commands_encoded: u64,
    pub commands_dropped: u64,
    pub queue_depth: u64,
    pub queue_drops: u64,
    pub pool_writes: u64,
    pub pool_write_failures: u64,
    pub pool_reconnects: u64,
    pub correlator_hits: u64,
    pub correlator_timeouts: u64,
    pub mqtt_messages_sent: u64,
    pub mqtt_publish_failures: u64,
    pub discovery_groups_published: u64,
}

pub type SharedStats = Arc<Mutex<BridgeStats>>;

impl BridgeStats {
    pub fn shared() -> SharedStats {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn log_summary(&self) {
        log::info!(
            "events: {} parsed, {} dropped",
            self.events_parsed,
            self.events_dropped
        );
        log::info!(
            "commands: {} encoded, {} dropped",
            self.commands_encoded,
            self.commands_dropped
        );
        log::info!(
            "queue: depth {}, {} dropped for overflow",
            self.queue_depth,
            self.queue_drops
        );
        log::info!(
            "pool: {} writes, {} failures, {} reconnects",
            self.pool_writes,
            self.pool_write_failures,
            self.pool_reconnects
        );
        log::info!(
            "correlator: {} hits, {} timeouts",
            self.correlator_hits,
            self.correlator_timeouts
        );
        log::info!(
            "mqtt: {} sent, {} publish failures",
            self.mqtt_messages_sent,
            self.mqtt_publish_failures
        );
        log::info!("discovery: {} groups published", self.discovery_groups_published);
    }
}

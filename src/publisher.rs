use crate::correlator::LevelReport;
use crate::prelude::*;
use crate::protocol::line::ParsedLine;
use crate::stats::SharedStats;

/// Maps parsed C-Gate lines to outbound MQTT publishes, and fans level
/// information out to the response correlator. Grounded on the teacher's
/// `coordinator::send_to_mqtt`/`publish_message`.
pub struct Publisher {
    settings: SettingsWrapper,
    channels: Channels,
    stats: SharedStats,
}

impl Publisher {
    pub fn new(settings: SettingsWrapper, channels: Channels, stats: SharedStats) -> Self {
        Self { settings, channels, stats }
    }

    pub async fn run(self) -> Result<()> {
        let mut receiver = self.channels.from_cgate.subscribe();
        let mut shutdown = self.channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("publisher shutting down");
                    return Ok(());
                }
                line = receiver.recv() => {
                    match line? {
                        ParsedLine::Event { address, action, level, .. } => {
                            self.publish_event(address, &action, level);
                        }
                        ParsedLine::Status { address, level } => {
                            self.publish_level(address, level);
                            let _ = self.channels.levels.send(LevelReport { address, raw: level });
                        }
                        ParsedLine::Response { .. } | ParsedLine::Invalid => {}
                    }
                }
            }
        }
    }

    fn publish_event(&self, address: GroupAddress, action: &str, level: Option<u8>) {
        let on = match action {
            "on" => true,
            "off" => false,
            "ramp" => level.map(|l| l > 0).unwrap_or(true),
            _ => return,
        };

        let retain = self.settings.mqtt().retain_reads;
        self.publish(format!("cbus/read/{}/state", address), if on { "ON" } else { "OFF" }.to_string(), retain);

        // Unsolicited on/off events often carry no numeric level; synthesize
        // the implied raw level from the action so a level publish always
        // accompanies the state publish (S1 in the spec's scenario table).
        let raw = level.unwrap_or(if on { Level::ON.raw() } else { Level::OFF.raw() });
        self.publish_level(address, raw);
    }

    fn publish_level(&self, address: GroupAddress, raw: u8) {
        let pct = Level::new(raw).to_percent();
        self.publish(format!("cbus/read/{}/level", address), pct.to_string(), self.settings.mqtt().retain_reads);
        if let Ok(mut stats) = self.stats.lock() {
            stats.events_parsed += 1;
        }
    }

    fn publish(&self, topic: String, payload: String, retain: bool) {
        let message = crate::mqtt::Message { topic, retain, payload };
        if self.channels.to_mqtt.send(crate::mqtt::ChannelData::Message(message)).is_err() {
            warn!("to_mqtt channel closed, dropping publish");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Discovery, Mqtt, Pool as PoolConfig, Settings};

    fn test_settings() -> SettingsWrapper {
        SettingsWrapper::from_settings(Settings {
            cgate_host: "127.0.0.1".to_string(),
            cgate_command_port: 20023,
            cgate_event_port: 20025,
            cgate_project: "PROJECT".to_string(),
            mqtt: Mqtt {
                broker: "127.0.0.1:1883".to_string(),
                username: None,
                password: None,
                client_id: "test".to_string(),
                retain_reads: true,
            },
            message_interval_ms: 200,
            pool: PoolConfig {
                size: 1,
                health_check_interval_ms: 30_000,
                keep_alive_interval_ms: 60_000,
                connection_timeout_ms: 2_000,
                max_retries: 3,
            },
            get_all_on_start: false,
            get_all_period_secs: None,
            get_all_net_app: None,
            discovery: Discovery {
                enabled: false,
                prefix: "homeassistant".to_string(),
                networks: vec![],
                cover_app_id: None,
                switch_app_id: None,
                relay_app_id: None,
                pir_app_id: None,
                label_file: None,
                period_secs: None,
            },
            loglevel: "info".to_string(),
        })
    }

    /// S1 in the spec's scenario table: an unsolicited `on` event with no
    /// numeric level must still produce a level publish at 100%, not just
    /// the state publish.
    #[test]
    fn on_event_with_no_level_publishes_full_level_alongside_state() {
        let channels = Channels::new();
        let publisher = Publisher::new(test_settings(), channels.clone(), crate::stats::BridgeStats::shared());
        let mut to_mqtt = channels.to_mqtt.subscribe();

        publisher.publish_event(GroupAddress::new(254, 56, 4), "on", None);

        let mut messages = Vec::new();
        for _ in 0..2 {
            match to_mqtt.try_recv().unwrap() {
                crate::mqtt::ChannelData::Message(m) => messages.push(m),
                crate::mqtt::ChannelData::Shutdown => panic!("unexpected shutdown"),
            }
        }

        let state = messages.iter().find(|m| m.topic == "cbus/read/254/56/4/state").unwrap();
        assert_eq!(state.payload, "ON");
        let level = messages.iter().find(|m| m.topic == "cbus/read/254/56/4/level").unwrap();
        assert_eq!(level.payload, "100");
    }

    /// An unsolicited `off` event with no numeric level publishes level 0.
    #[test]
    fn off_event_with_no_level_publishes_zero_level_alongside_state() {
        let channels = Channels::new();
        let publisher = Publisher::new(test_settings(), channels.clone(), crate::stats::BridgeStats::shared());
        let mut to_mqtt = channels.to_mqtt.subscribe();

        publisher.publish_event(GroupAddress::new(254, 56, 4), "off", None);

        let mut messages = Vec::new();
        for _ in 0..2 {
            match to_mqtt.try_recv().unwrap() {
                crate::mqtt::ChannelData::Message(m) => messages.push(m),
                crate::mqtt::ChannelData::Shutdown => panic!("unexpected shutdown"),
            }
        }

        let level = messages.iter().find(|m| m.topic == "cbus/read/254/56/4/level").unwrap();
        assert_eq!(level.payload, "0");
    }

    /// S2 in the spec's scenario table: a ramp event with an explicit raw
    /// level still publishes the percent derived from that raw value, not
    /// the synthesized on/off default.
    #[test]
    fn ramp_event_with_explicit_level_publishes_its_own_percent() {
        let channels = Channels::new();
        let publisher = Publisher::new(test_settings(), channels.clone(), crate::stats::BridgeStats::shared());
        let mut to_mqtt = channels.to_mqtt.subscribe();

        publisher.publish_event(GroupAddress::new(254, 56, 6), "ramp", Some(128));

        let mut messages = Vec::new();
        for _ in 0..2 {
            match to_mqtt.try_recv().unwrap() {
                crate::mqtt::ChannelData::Message(m) => messages.push(m),
                crate::mqtt::ChannelData::Shutdown => panic!("unexpected shutdown"),
            }
        }

        let state = messages.iter().find(|m| m.topic == "cbus/read/254/56/6/state").unwrap();
        assert_eq!(state.payload, "ON");
        let level = messages.iter().find(|m| m.topic == "cbus/read/254/56/6/level").unwrap();
        assert_eq!(level.payload, "50");
    }
}

use crate::prelude::*;

use crate::correlator;
use crate::discovery;
use crate::protocol::line::ParsedLine;

#[derive(Debug, Clone)]
pub struct Channels {
    /// Lines read from the event socket or a pool connection.
    pub from_cgate: broadcast::Sender<ParsedLine>,
    /// Messages received from MQTT.
    pub from_mqtt: broadcast::Sender<crate::mqtt::ChannelData>,
    /// Messages to publish to MQTT.
    pub to_mqtt: broadcast::Sender<crate::mqtt::ChannelData>,
    /// Level reports, fanned out to the response correlator.
    pub levels: broadcast::Sender<correlator::LevelReport>,
    /// Requests to (re)run discovery for a network.
    pub discover: broadcast::Sender<discovery::DiscoverRequest>,
    /// Process-wide shutdown signal.
    pub shutdown: broadcast::Sender<()>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_cgate: Self::channel(),
            from_mqtt: Self::channel(),
            to_mqtt: Self::channel(),
            levels: Self::channel(),
            discover: Self::channel(),
            shutdown: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}

use crate::connection::pool::Pool;
use crate::connection::single::EventConnection;
use crate::correlator::Correlator;
use crate::discovery::{DiscoverRequest, Engine as DiscoveryEngine};
use crate::mqtt::Mqtt;
use crate::prelude::*;
use crate::publisher::Publisher;
use crate::queue::ThrottledQueue;
use crate::router::Router;
use crate::stats::{BridgeStats, SharedStats};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Owns construction, startup ordering, and shutdown of every long-running
/// component. Grounded on the teacher's `Components`/`app()` (construction
/// order, one `tokio::spawn` per component, a `broadcast::channel`
/// shutdown signal, join-then-log on the way down), generalized from a
/// fixed set of inverter/database/mqtt/influx components to the bridge's
/// pool/queue/correlator/router/publisher/discovery set.
pub struct Coordinator {
    settings: SettingsWrapper,
    channels: Channels,
    stats: SharedStats,
    pool: Arc<Pool>,
    queue: Arc<ThrottledQueue>,
    correlator: Arc<Correlator>,
    handles: Vec<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(settings: SettingsWrapper) -> Self {
        let channels = Channels::new();
        let stats = BridgeStats::shared();
        let pool_cfg = settings.pool();

        let pool = Pool::new(
            settings.cgate_host(),
            settings.cgate_command_port(),
            pool_cfg.size,
            Duration::from_millis(pool_cfg.health_check_interval_ms),
            Duration::from_millis(pool_cfg.keep_alive_interval_ms),
            Duration::from_millis(pool_cfg.connection_timeout_ms),
            pool_cfg.max_retries,
            channels.clone(),
            stats.clone(),
        );

        let queue = ThrottledQueue::new(
            Duration::from_millis(settings.message_interval_ms()),
            pool.clone(),
            stats.clone(),
        );

        let correlator = Correlator::new(stats.clone());

        Self {
            settings,
            channels,
            stats,
            pool,
            queue,
            correlator,
            handles: Vec::new(),
        }
    }

    pub fn channels(&self) -> Channels {
        self.channels.clone()
    }

    /// Startup order per the design notes: MQTT connect, pool start, event
    /// connection start, initial `getall` if configured, discovery if
    /// enabled. Each long-running task is spawned and its handle kept so
    /// `stop()` can join them on the way down.
    pub async fn start(&mut self) -> Result<()> {
        let mqtt = Mqtt::new(self.settings.clone(), self.channels.clone(), self.stats.clone());
        let (mqtt_ready_tx, mqtt_ready_rx) = tokio::sync::oneshot::channel();
        self.spawn("mqtt", async move {
            let result = mqtt.start().await;
            let _ = mqtt_ready_tx.send(result.is_ok());
            if let Err(e) = result {
                error!("mqtt task failed: {}", e);
            }
        });

        // MQTT connect failures (refused, auth rejected) surface within the
        // first handshake; give the task a short window to fail fast before
        // treating startup as successful, per the exit-code contract in the
        // external interfaces section.
        tokio::select! {
            result = mqtt_ready_rx => {
                if matches!(result, Ok(false)) {
                    bail!("coordinator.rs:mqtt failed to start");
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(3)) => {}
        }

        self.pool.start().await?;

        let queue = self.queue.clone();
        let channels = self.channels.clone();
        self.spawn("queue", async move {
            if let Err(e) = queue.run(channels).await {
                error!("queue task failed: {}", e);
            }
        });

        let correlator = self.correlator.clone();
        let channels = self.channels.clone();
        self.spawn("correlator", async move {
            if let Err(e) = correlator.run(channels).await {
                error!("correlator task failed: {}", e);
            }
        });

        let event_connection = EventConnection::new(
            self.settings.cgate_host(),
            self.settings.cgate_event_port(),
            Duration::from_millis(self.settings.pool().connection_timeout_ms),
            self.channels.clone(),
        );
        self.spawn("event_connection", async move {
            if let Err(e) = event_connection.start().await {
                error!("event connection task failed: {}", e);
            }
        });

        let publisher = Publisher::new(self.settings.clone(), self.channels.clone(), self.stats.clone());
        self.spawn("publisher", async move {
            if let Err(e) = publisher.run().await {
                error!("publisher task failed: {}", e);
            }
        });

        let router = Router::new(
            self.settings.clone(),
            self.channels.clone(),
            self.queue.clone(),
            self.correlator.clone(),
            self.stats.clone(),
        );
        self.spawn("router", async move {
            if let Err(e) = router.run().await {
                error!("router task failed: {}", e);
            }
        });

        let discovery = DiscoveryEngine::new(
            self.settings.clone(),
            self.channels.clone(),
            self.queue.clone(),
            self.stats.clone(),
        );
        self.spawn("discovery", async move {
            if let Err(e) = discovery.run().await {
                error!("discovery task failed: {}", e);
            }
        });

        if self.settings.get_all_on_start() {
            self.request_get_all();
        }
        self.schedule_periodic_get_all();

        if self.settings.discovery().enabled {
            let _ = self.channels.discover.send(DiscoverRequest::All);
        }
        self.schedule_periodic_discovery();

        Ok(())
    }

    pub async fn stop(&mut self) {
        info!("stopping coordinator");
        let _ = self.channels.shutdown.send(());
        self.pool.stop().await;

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("error joining component task: {}", e);
            }
        }
        self.stats.lock().unwrap().log_summary();
    }

    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!("starting {} task", name);
        self.handles.push(tokio::spawn(future));
    }

    fn request_get_all(&self) {
        let net_app = match self.settings.get_all_net_app() {
            Some(s) => s,
            None => return,
        };
        let mut parts = net_app.splitn(2, '/');
        let (network, application) = match (parts.next(), parts.next()) {
            (Some(n), Some(a)) => (n.parse::<u8>(), a.parse::<u8>()),
            _ => {
                warn!("coordinator.rs:invalid get_all_net_app {:?}, skipping", net_app);
                return;
            }
        };
        let (network, application) = match (network, application) {
            (Ok(n), Ok(a)) => (n, a),
            _ => {
                warn!("coordinator.rs:invalid get_all_net_app {:?}, skipping", net_app);
                return;
            }
        };

        if let Some(encoded) = crate::protocol::command::encode(
            &crate::protocol::command::Command::GetAll { network, application },
            &self.settings.cgate_project(),
        ) {
            self.queue.push(encoded);
        }
    }

    fn schedule_periodic_get_all(&mut self) {
        let period = match self.settings.get_all_period_secs() {
            Some(p) if p > 0 => p,
            _ => return,
        };

        let settings = self.settings.clone();
        let queue = self.queue.clone();
        let channels = self.channels.clone();
        self.spawn("periodic_getall", async move {
            let mut tick = tokio::time::interval(Duration::from_secs(period));
            let mut shutdown = channels.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = tick.tick() => {
                        if let Some(net_app) = settings.get_all_net_app() {
                            let mut parts = net_app.splitn(2, '/');
                            if let (Some(n), Some(a)) = (parts.next(), parts.next()) {
                                if let (Ok(network), Ok(application)) = (n.parse::<u8>(), a.parse::<u8>()) {
                                    if let Some(encoded) = crate::protocol::command::encode(
                                        &crate::protocol::command::Command::GetAll { network, application },
                                        &settings.cgate_project(),
                                    ) {
                                        queue.push(encoded);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    fn schedule_periodic_discovery(&mut self) {
        let discovery = self.settings.discovery();
        let period = match discovery.period_secs {
            Some(p) if discovery.enabled && p > 0 => p,
            _ => return,
        };

        let channels = self.channels.clone();
        self.spawn("periodic_discovery", async move {
            let mut tick = tokio::time::interval(Duration::from_secs(period));
            let mut shutdown = channels.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = tick.tick() => {
                        let _ = channels.discover.send(DiscoverRequest::All);
                    }
                }
            }
        });
    }
}

use crate::prelude::*;

use serde::Deserialize;
use serde_with::serde_as;
use std::sync::{Arc, Mutex};

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub cgate_host: String,

    #[serde(default = "Settings::default_command_port")]
    pub cgate_command_port: u16,

    #[serde(default = "Settings::default_event_port")]
    pub cgate_event_port: u16,

    pub cgate_project: String,

    pub mqtt: Mqtt,

    #[serde(default = "Settings::default_message_interval")]
    pub message_interval_ms: u64,

    #[serde(default = "Settings::default_pool")]
    pub pool: Pool,

    #[serde(default = "Settings::default_get_all_on_start")]
    pub get_all_on_start: bool,

    pub get_all_period_secs: Option<u64>,

    #[serde(default)]
    pub get_all_net_app: Option<String>,

    #[serde(default = "Settings::default_discovery")]
    pub discovery: Discovery,

    #[serde(default = "Settings::default_loglevel")]
    pub loglevel: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    pub broker: String,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Settings::default_client_id")]
    pub client_id: String,

    #[serde(default = "Settings::default_retain_reads")]
    pub retain_reads: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Pool {
    #[serde(default = "Settings::default_pool_size")]
    pub size: usize,

    #[serde(default = "Settings::default_health_check_interval")]
    pub health_check_interval_ms: u64,

    #[serde(default = "Settings::default_keep_alive_interval")]
    pub keep_alive_interval_ms: u64,

    #[serde(default = "Settings::default_connection_timeout")]
    pub connection_timeout_ms: u64,

    #[serde(default = "Settings::default_max_retries")]
    pub max_retries: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Discovery {
    #[serde(default = "Settings::default_discovery_enabled")]
    pub enabled: bool,

    #[serde(default = "Settings::default_discovery_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub networks: Vec<u8>,

    pub cover_app_id: Option<u8>,
    pub switch_app_id: Option<u8>,
    pub relay_app_id: Option<u8>,
    pub pir_app_id: Option<u8>,

    pub label_file: Option<String>,

    pub period_secs: Option<u64>,
}

impl Settings {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading settings from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| file_error_with_source!(err, "error reading {}", file))?;

        let settings: Self = serde_yaml::from_str(&content)?;

        info!("Settings loaded successfully:");
        info!("  C-Gate: {}:{} (command), :{} (event), project {}",
            settings.cgate_host, settings.cgate_command_port, settings.cgate_event_port,
            settings.cgate_project);
        info!("  MQTT broker: {}", settings.mqtt.broker);
        info!("  Message interval: {}ms", settings.message_interval_ms);
        info!("  Pool size: {}", settings.pool.size);
        info!("  Discovery: {}", if settings.discovery.enabled { "enabled" } else { "disabled" });
        info!("  Log level: {}", settings.loglevel);

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.cgate_host.is_empty() {
            bail!("settings.rs:cgate_host cannot be empty");
        }
        if self.cgate_project.is_empty() {
            bail!("settings.rs:cgate_project cannot be empty");
        }
        if self.mqtt.broker.is_empty() {
            bail!("settings.rs:mqtt.broker cannot be empty");
        }
        if !(10..=10_000).contains(&self.message_interval_ms) {
            bail!("settings.rs:message_interval_ms must be between 10 and 10000");
        }
        if self.pool.size < 1 {
            bail!("settings.rs:pool.size must be at least 1");
        }
        if self.pool.health_check_interval_ms < 5_000 {
            bail!("settings.rs:pool.health_check_interval_ms must be at least 5000");
        }
        if self.pool.keep_alive_interval_ms < 10_000 {
            bail!("settings.rs:pool.keep_alive_interval_ms must be at least 10000");
        }
        if self.pool.connection_timeout_ms < 1_000 {
            bail!("settings.rs:pool.connection_timeout_ms must be at least 1000");
        }
        if self.pool.max_retries < 1 {
            bail!("settings.rs:pool.max_retries must be at least 1");
        }
        if self.discovery.enabled && self.discovery.networks.is_empty() {
            warn!("discovery is enabled but no networks are configured");
        }
        Ok(())
    }

    fn default_command_port() -> u16 {
        20023
    }
    fn default_event_port() -> u16 {
        20025
    }
    fn default_message_interval() -> u64 {
        200
    }
    fn default_pool() -> Pool {
        Pool {
            size: Self::default_pool_size(),
            health_check_interval_ms: Self::default_health_check_interval(),
            keep_alive_interval_ms: Self::default_keep_alive_interval(),
            connection_timeout_ms: Self::default_connection_timeout(),
            max_retries: Self::default_max_retries(),
        }
    }
    fn default_pool_size() -> usize {
        3
    }
    fn default_health_check_interval() -> u64 {
        30_000
    }
    fn default_keep_alive_interval() -> u64 {
        60_000
    }
    fn default_connection_timeout() -> u64 {
        5_000
    }
    fn default_max_retries() -> u32 {
        3
    }
    fn default_get_all_on_start() -> bool {
        true
    }
    fn default_client_id() -> String {
        "cgateweb-rs".to_string()
    }
    fn default_retain_reads() -> bool {
        true
    }
    fn default_discovery() -> Discovery {
        Discovery {
            enabled: Self::default_discovery_enabled(),
            prefix: Self::default_discovery_prefix(),
            networks: Vec::new(),
            cover_app_id: None,
            switch_app_id: None,
            relay_app_id: None,
            pir_app_id: None,
            label_file: None,
            period_secs: None,
        }
    }
    fn default_discovery_enabled() -> bool {
        false
    }
    fn default_discovery_prefix() -> String {
        "homeassistant".to_string()
    }
    fn default_loglevel() -> String {
        "info".to_string()
    }
}

pub struct SettingsWrapper {
    settings: Arc<Mutex<Settings>>,
}

impl Clone for SettingsWrapper {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
        }
    }
}

impl SettingsWrapper {
    pub fn new(file: String) -> Result<Self> {
        let settings = Settings::new(file)?;
        Ok(Self {
            settings: Arc::new(Mutex::new(settings)),
        })
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
        }
    }

    pub fn cgate_host(&self) -> String {
        self.settings.lock().unwrap().cgate_host.clone()
    }

    pub fn cgate_command_port(&self) -> u16 {
        self.settings.lock().unwrap().cgate_command_port
    }

    pub fn cgate_event_port(&self) -> u16 {
        self.settings.lock().unwrap().cgate_event_port
    }

    pub fn cgate_project(&self) -> String {
        self.settings.lock().unwrap().cgate_project.clone()
    }

    pub fn mqtt(&self) -> Mqtt {
        self.settings.lock().unwrap().mqtt.clone()
    }

    pub fn message_interval_ms(&self) -> u64 {
        self.settings.lock().unwrap().message_interval_ms
    }

    pub fn pool(&self) -> Pool {
        self.settings.lock().unwrap().pool.clone()
    }

    pub fn get_all_on_start(&self) -> bool {
        self.settings.lock().unwrap().get_all_on_start
    }

    pub fn get_all_period_secs(&self) -> Option<u64> {
        self.settings.lock().unwrap().get_all_period_secs
    }

    pub fn get_all_net_app(&self) -> Option<String> {
        self.settings.lock().unwrap().get_all_net_app.clone()
    }

    pub fn discovery(&self) -> Discovery {
        self.settings.lock().unwrap().discovery.clone()
    }

    pub fn loglevel(&self) -> String {
        self.settings.lock().unwrap().loglevel.clone()
    }
}

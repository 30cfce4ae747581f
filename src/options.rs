use clap::Parser;

/// cgateweb - a bridge between a C-Gate server and MQTT
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Settings file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds, mostly useful for tests
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config_file: "config.yaml".to_string(),
            runtime: None,
        }
    }
}

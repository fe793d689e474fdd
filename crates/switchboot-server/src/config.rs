use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Controller configuration. Every key is optional in the environment; the
/// defaults below describe a controller with sixteen console ports at
/// `/dev/port1..16` and a local SQLite store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub serial_baudrate: u32,
    /// Per-read timeout in seconds.
    pub serial_timeout: u64,
    pub serial_port_base_path: String,
    pub default_parallelism: u32,
    pub api_passcode: Option<String>,
    pub cors_origins: Vec<String>,
    pub log_level: String,
    /// "text" or "json".
    pub log_format: String,
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:switchboot.db".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            serial_baudrate: 9600,
            serial_timeout: 10,
            serial_port_base_path: "/dev/port".to_string(),
            default_parallelism: 4,
            api_passcode: None,
            cors_origins: vec!["*".to_string()],
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment (`DATABASE_URL`,
    /// `SERIAL_BAUDRATE`, `API_PASSCODE`, ...). `CORS_ORIGINS` is a
    /// comma-separated list.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let source = config::Environment::default()
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cors_origins");
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid server address")
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.serial_timeout)
    }
}

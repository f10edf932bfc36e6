//! Configuration, from the environment or from a toml file.

use std::path::Path;
use std::time::Duration;

use envconfig::Envconfig;
use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_TIMEOUT_MS: i64 = 60_000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_MS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_use_full_url() -> bool {
    true
}

fn default_protocol() -> String {
    "http".to_owned()
}

fn default_port() -> u16 {
    9200
}

fn default_influxdb_url() -> String {
    "http://localhost:8086".to_owned()
}

/// Where and how to poll the Elasticsearch cluster.
#[derive(Debug, Clone, Envconfig, Deserialize)]
pub struct MonitorConfig {
    /// Base url of the cluster, e.g. `http://localhost:9200`.
    /// Only used when `use_full_url` is set.
    #[envconfig(from = "ELASTICSEARCH_URL", default = "")]
    #[serde(default)]
    pub url: String,

    /// Use `url` as is, instead of building it from protocol, host and port.
    #[envconfig(from = "ELASTICSEARCH_USE_FULL_URL", default = "true")]
    #[serde(default = "default_use_full_url")]
    pub use_full_url: bool,

    #[envconfig(from = "ELASTICSEARCH_PROTOCOL", default = "http")]
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Host of the cluster, required when `use_full_url` is not set.
    #[envconfig(from = "ELASTICSEARCH_HOST")]
    pub host: Option<String>,

    #[envconfig(from = "ELASTICSEARCH_PORT", default = "9200")]
    #[serde(default = "default_port")]
    pub port: u16,

    /// Basic auth user. No authentication is sent when absent.
    #[envconfig(from = "ELASTICSEARCH_USER")]
    pub user: Option<String>,

    #[envconfig(from = "ELASTICSEARCH_PASSWORD")]
    pub password: Option<String>,

    /// Request timeout in milliseconds, zero disables the timeout.
    #[envconfig(from = "ELASTICSEARCH_TIMEOUT", default = "60000")]
    #[serde(default = "default_timeout")]
    pub timeout: i64,

    /// Seconds between two polling cycles.
    #[envconfig(from = "ELASTICSEARCH_POLL_INTERVAL", default = "60")]
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl MonitorConfig {
    /// A configuration for the given base url, with defaults for everything else.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            use_full_url: true,
            protocol: default_protocol(),
            host: None,
            port: default_port(),
            user: None,
            password: None,
            timeout: DEFAULT_TIMEOUT_MS,
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
        }
    }

    /// Check the configuration and resolve the url, without trailing slash.
    pub fn validated(mut self) -> Result<Self> {
        if !self.use_full_url {
            self.url = self.url_from_parts()?;
        }

        let url = self.url.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(Error::Config("Parameter <url> must not be empty".to_owned()));
        }
        self.url = url.to_owned();

        if !(0..=i64::from(i32::MAX)).contains(&self.timeout) {
            return Err(Error::Config(format!(
                "Timeout needs to be in range [0,{}]",
                i32::MAX
            )));
        }

        if self.poll_interval == 0 {
            return Err(Error::Config(
                "Poll interval must be greater than zero".to_owned(),
            ));
        }

        Ok(self)
    }

    fn url_from_parts(&self) -> Result<String> {
        let protocol = self.protocol.trim();
        if protocol.is_empty() {
            return Err(Error::Config("Parameter <protocol> must not be empty".to_owned()));
        }

        let host = self.host.as_deref().map(str::trim).unwrap_or_default();
        if host.is_empty() {
            return Err(Error::Config("Parameter <host> must not be empty".to_owned()));
        }

        if self.port == 0 {
            return Err(Error::Config("Parameter <port> must not be zero".to_owned()));
        }

        Ok(format!("{}://{}:{}", protocol, host, self.port))
    }

    /// The request timeout, `None` if disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        u64::try_from(self.timeout)
            .ok()
            .filter(|&timeout| timeout > 0)
            .map(Duration::from_millis)
    }

    /// The time between two polling cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

/// The influxdb instance the measures are reported to.
#[derive(Debug, Clone, Envconfig, Deserialize)]
pub struct InfluxConfig {
    #[envconfig(from = "INFLUXDB_URL", default = "http://localhost:8086")]
    #[serde(default = "default_influxdb_url")]
    pub url: String,

    #[envconfig(from = "INFLUXDB_DATABASE")]
    pub database: String,

    #[envconfig(from = "INFLUXDB_USER")]
    pub user: Option<String>,

    #[envconfig(from = "INFLUXDB_PASSWORD")]
    pub password: Option<String>,
}

impl InfluxConfig {
    /// Build the [influxdb] client.
    pub fn client(&self) -> influxdb::Client {
        let client = influxdb::Client::new(&self.url, &self.database);

        match &self.user {
            Some(user) => client.with_auth(user, self.password.as_deref().unwrap_or_default()),
            None => client,
        }
    }
}

/// Complete settings of a monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub elasticsearch: MonitorConfig,
    pub influxdb: InfluxConfig,
}

impl Settings {
    /// Load the settings from environment variables.
    pub fn from_env() -> Result<Self> {
        let elasticsearch = MonitorConfig::init_from_env()
            .map_err(|error| Error::Config(error.to_string()))?;
        let influxdb =
            InfluxConfig::init_from_env().map_err(|error| Error::Config(error.to_string()))?;

        Self {
            elasticsearch,
            influxdb,
        }
        .validated()
    }

    /// Parse and validate toml settings.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str::<Self>(contents)?.validated()
    }

    /// Read and validate a toml settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn validated(self) -> Result<Self> {
        Ok(Self {
            elasticsearch: self.elasticsearch.validated()?,
            influxdb: self.influxdb,
        })
    }
}

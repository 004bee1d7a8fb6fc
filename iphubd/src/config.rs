use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::DEFAULT_PORT;

/// Where the daemon looks for its config when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/iphub/iphubd.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub advertise: AdvertiseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// How long SQLite waits on a locked database file
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
    /// How long a request waits for the store thread before failing
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

/// mDNS self-advertisement, off unless enabled
#[derive(Debug, Clone, Deserialize)]
pub struct AdvertiseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_instance")]
    pub instance: String,
    /// Comma-separated addresses to advertise. Empty means detect automatically.
    #[serde(default)]
    pub address: String,
}

fn default_listen() -> String {
    format!("0.0.0.0:{}", DEFAULT_PORT)
}

fn default_db_path() -> PathBuf {
    PathBuf::from("ip_addresses.db")
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_acquire_timeout() -> u64 {
    5000
}

fn default_instance() -> String {
    "iphub".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instance: default_instance(),
            address: String::new(),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl ApiConfig {
    /// Port part of the listen address, used for mDNS advertisement
    pub fn port(&self) -> u16 {
        self.listen
            .rsplit(':')
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the file named on the command line, or the default location.
    /// Falls back to built-in defaults only when no path was given and the
    /// default file does not exist.
    pub fn resolve(explicit: Option<&str>) -> Result<(Self, String)> {
        match explicit {
            Some(path) => Ok((Self::load(path)?, path.to_string())),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Ok((Self::load(DEFAULT_CONFIG_PATH)?, DEFAULT_CONFIG_PATH.to_string()))
            }
            None => Ok((Self::default(), "built-in defaults".to_string())),
        }
    }
}

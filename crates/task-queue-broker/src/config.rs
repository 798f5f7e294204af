use anyhow::{bail, Context};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use task_queue_core::DEFAULT_VISIBILITY_TIMEOUT_SECS;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub persistence: PersistenceConfig,
    pub lease: LeaseConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// Answer a command that arrived without a trailing newline once the
    /// client has sent nothing else for this long; 0 waits for the newline
    pub unterminated_line_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub snapshot_path: PathBuf,
    /// Write a snapshot when the broker shuts down
    pub save_on_shutdown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// How long a leased task may go unacknowledged before it is requeued
    pub visibility_timeout_secs: u64,
    /// Background sweep period; 0 sweeps only when commands arrive
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Serve `/metrics` on this port when set
    pub prometheus_port: Option<u16>,
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: 5555,
            unterminated_line_timeout_ms: 200,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            snapshot_path: PathBuf::from("db.snapshot.json"),
            save_on_shutdown: false,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        LeaseConfig {
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            sweep_interval_secs: 1,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            prometheus_port: None,
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config file {:?}", path))?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }

    /// Lease visibility timeout
    pub fn visibility_timeout(&self) -> anyhow::Result<Duration> {
        i64::try_from(self.lease.visibility_timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .with_context(|| {
                format!(
                    "visibility timeout of {} seconds is out of range",
                    self.lease.visibility_timeout_secs
                )
            })
    }

    /// `None` when unterminated lines are only served at end of stream
    pub fn unterminated_line_timeout(&self) -> Option<std::time::Duration> {
        match self.broker.unterminated_line_timeout_ms {
            0 => None,
            ms => Some(std::time::Duration::from_millis(ms)),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.broker.host.is_empty() {
            bail!("broker.host must not be empty");
        }
        if self.persistence.snapshot_path.as_os_str().is_empty() {
            bail!("persistence.snapshot_path must not be empty");
        }
        self.visibility_timeout()?;
        Ok(())
    }
}

//! Runtime configuration.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use mastership_core::store::DEFAULT_EVENT_BUFFER;
use mastership_core::{ReadPolicy, RetryPolicy};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The ID of this node within the cluster.
    pub node_id: String,
    /// The IDs of all cluster nodes, which must include this node.
    pub cluster_nodes: Vec<String>,
    /// The port on which device and membership signals are received.
    pub http_port: u16,
    /// The port on which metrics are exposed.
    pub metrics_port: u16,

    /// The path to the database on disk.
    #[serde(default = "crate::database::default_data_path")]
    pub storage_data_path: String,

    /// The maximum number of CAS attempts for a single mastership mutation.
    #[serde(default = "default_cas_max_attempts")]
    pub cas_max_attempts: u32,
    /// The backoff applied after the first CAS conflict.
    #[serde(default = "default_cas_backoff_millis")]
    pub cas_backoff_millis: u64,
    /// The upper bound of any single CAS backoff.
    #[serde(default = "default_cas_max_backoff_millis")]
    pub cas_max_backoff_millis: u64,
    /// The capacity of the mastership event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// How reads behave while the store is unavailable.
    #[serde(default = "default_read_policy", deserialize_with = "Config::parse_read_policy")]
    pub read_policy: ReadPolicy,
    /// The interval at which local device roles are reconciled with the store.
    #[serde(default = "default_mastership_check_seconds")]
    pub mastership_check_seconds: u64,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the relationships between config values.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            bail!("NODE_ID must not be empty");
        }
        if !self.cluster_nodes.iter().any(|node| node == &self.node_id) {
            bail!("CLUSTER_NODES must include this node's ID {}", self.node_id);
        }
        if self.cas_max_attempts == 0 {
            bail!("CAS_MAX_ATTEMPTS must be at least 1");
        }
        if self.mastership_check_seconds == 0 {
            bail!("MASTERSHIP_CHECK_SECONDS must be at least 1");
        }
        Ok(())
    }

    /// The CAS retry policy described by this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.cas_max_attempts,
            base_backoff: Duration::from_millis(self.cas_backoff_millis),
            max_backoff: Duration::from_millis(self.cas_max_backoff_millis),
        }
    }

    pub fn mastership_check_interval(&self) -> Duration {
        Duration::from_secs(self.mastership_check_seconds)
    }

    /// Parse the read policy from the config source.
    fn parse_read_policy<'de, D: Deserializer<'de>>(val: D) -> Result<ReadPolicy, D::Error> {
        let policy: String = Deserialize::deserialize(val)?;
        policy.parse().map_err(DeError::custom)
    }
}

fn default_cas_max_attempts() -> u32 {
    32
}

fn default_cas_backoff_millis() -> u64 {
    5
}

fn default_cas_max_backoff_millis() -> u64 {
    250
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_read_policy() -> ReadPolicy {
    ReadPolicy::Available
}

fn default_mastership_check_seconds() -> u64 {
    60
}

//! Configuration for chunkmesh nodes

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix (e.g. `CHUNKMESH_PEERS=http://a:3000,http://b:3000`)
pub const ENV_PREFIX: &str = "CHUNKMESH";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (`<label>-<number>`); generated when absent
    #[serde(default)]
    pub node_id: Option<String>,

    /// Logical service advertised by every node of the cluster
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Bind address for HTTP (public API and internal RPC)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Base URL other nodes use to reach this node
    #[serde(default = "default_advertise_addr")]
    pub advertise_addr: String,

    /// Seed peers (base URLs)
    #[serde(default)]
    pub peers: Vec<String>,

    /// Root directory for chunks, duplicates, temp files and metadata
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the node hosting the cluster cache; this node when absent
    #[serde(default)]
    pub cache_url: Option<String>,

    /// Membership poll interval
    #[serde(default = "default_membership_interval")]
    pub membership_interval_ms: u64,

    /// Timeout applied to every outbound RPC
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Maximum accepted upload body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_service_name() -> String {
    "file".to_string()
}
fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}
fn default_advertise_addr() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./node-data")
}
fn default_membership_interval() -> u64 {
    1000
}
fn default_rpc_timeout() -> u64 {
    5000
}
fn default_max_upload_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: None,
            service_name: default_service_name(),
            bind_addr: default_bind_addr(),
            advertise_addr: default_advertise_addr(),
            peers: Vec::new(),
            data_dir: default_data_dir(),
            cache_url: None,
            membership_interval_ms: default_membership_interval(),
            rpc_timeout_ms: default_rpc_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration: optional TOML file, then `CHUNKMESH_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("peers"),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(config)
    }

    /// Check values that would otherwise fail late at runtime
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.node_id {
            crate::cluster::NodeId::parse(id)?;
        }
        if self.service_name.trim().is_empty() {
            return Err(Error::InvalidConfig("service_name cannot be empty".into()));
        }
        if !self.advertise_addr.starts_with("http://")
            && !self.advertise_addr.starts_with("https://")
        {
            return Err(Error::InvalidConfig(format!(
                "advertise_addr must be an http(s) URL: {}",
                self.advertise_addr
            )));
        }
        if self.membership_interval_ms == 0 || self.rpc_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "membership_interval_ms and rpc_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn membership_interval(&self) -> Duration {
        Duration::from_millis(self.membership_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

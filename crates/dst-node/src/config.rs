//! Node configuration.
//!
//! Every section has defaults, so a config file only names what it
//! changes:
//!
//! ```json
//! {
//!   "message_timeout": { "secs": 10, "nanos": 0 },
//!   "lib_signatures_addr": "0x5d5c99edf529335160ff180fa141dd4967fc00d2"
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dst_node_chain::{ChainConfig, WatcherConfig};
use dst_node_channel::{AdapterConfig, ChannelConfig, ListenerConfig};
use dst_node_core::Address;

use crate::error::Result;

/// Configuration of a node and the channels it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub adapter: AdapterConfig,
    pub listener: ListenerConfig,
    pub watcher: WatcherConfig,
    pub chain: ChainConfig,
    /// How long to wait for each peer message.
    pub message_timeout: Duration,
    /// How long to wait for each contract event.
    pub event_timeout: Duration,
    /// Deployed signature library to reuse instead of deploying one.
    pub lib_signatures_addr: Option<Address>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterConfig::default(),
            listener: ListenerConfig::default(),
            watcher: WatcherConfig::default(),
            chain: ChainConfig::default(),
            message_timeout: Duration::from_secs(30),
            event_timeout: Duration::from_secs(60),
            lib_signatures_addr: None,
        }
    }
}

impl NodeConfig {
    /// Parse a JSON config; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Settings for the off-chain channels.
    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            adapter: self.adapter,
            listener: self.listener,
            message_timeout: self.message_timeout,
        }
    }
}

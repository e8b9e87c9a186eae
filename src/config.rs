use std::fs;

use serde_derive::Deserialize;
use thiserror::Error;

use crate::key::Key;

/// Errors raised while loading the node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// The file was not a valid configuration object.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The node configuration, read from a JSON file holding exactly the keys
/// `addr`, `port`, `boot-addr`, and `boot-port`. The node's UID is derived
/// from the listen address and port, never configured.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    pub addr: String,
    pub port: u16,
    #[serde(rename = "boot-addr")]
    pub boot_addr: String,
    #[serde(rename = "boot-port")]
    pub boot_port: u16,
}

impl Configuration {
    pub fn load(path: &str) -> Result<Configuration, ConfigError> {
        let payload = fs::read_to_string(path)?;
        serde_json::from_str(&payload).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// The UID this configuration derives for the local node.
    pub fn uid(&self) -> String {
        Key::for_node(&self.addr, self.port).to_base64()
    }
}

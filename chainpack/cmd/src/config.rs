//! Configuration handling for the echo daemon.
//!
//! This module reads the daemon YAML config file and applies environment
//! variable overrides on top, providing a unified configuration interface.

use anyhow::Result;
use chainpack_rpc::{DEFAULT_MAX_PACKET_BYTES, DEFAULT_MAX_QUEUE_BYTES};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Echo daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Address to accept connections on, if any
    pub listen: Option<String>,
    /// Peer addresses to dial on startup
    pub connect: Vec<String>,
    /// Log level for daemon components
    pub log_level: String,
    /// Seconds without inbound traffic before a connection counts as idle
    pub idle_interval: u64,
    /// Packed bytes one connection may queue before refusing new messages
    pub max_queue_bytes: usize,
    /// Largest inbound packet accepted before the connection is dropped
    pub max_packet_bytes: usize,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            listen: None,
            connect: Vec::new(),
            log_level: "info".to_string(),
            idle_interval: 30,
            max_queue_bytes: DEFAULT_MAX_QUEUE_BYTES,
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
        }
    }
}

impl EchoConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        // Try to read the config file
        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<EchoConfig>(&content) {
                Ok(parsed) => {
                    config = parsed;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(err) => {
                    warn!(
                        "Failed to parse config file {:?}, using defaults: {}",
                        config_path.as_ref(),
                        err
                    );
                }
            }
        } else {
            warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        // Override with environment variables
        config.apply_environment_overrides();

        info!(
            "Final configuration: listen={:?}, connect={:?}, idle_interval={}s",
            config.listen, config.connect, config.idle_interval
        );

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(listen) = std::env::var("CHAINPACK_LISTEN") {
            info!("Listen address overridden by environment: {}", listen);
            self.listen = Some(listen);
        }

        if let Ok(connect) = std::env::var("CHAINPACK_CONNECT") {
            let peers: Vec<String> = connect
                .split(',')
                .map(|peer| peer.trim().to_string())
                .filter(|peer| !peer.is_empty())
                .collect();
            info!("Connect peers overridden by environment: {:?}", peers);
            self.connect = peers;
        }

        if let Ok(level) = std::env::var("CHAINPACK_LOG_LEVEL") {
            self.log_level = level;
            info!("Log level overridden by environment: {}", self.log_level);
        }

        if let Ok(idle) = std::env::var("CHAINPACK_IDLE_INTERVAL") {
            if let Ok(secs) = idle.parse::<u64>() {
                self.idle_interval = secs;
                info!("Idle interval overridden by environment: {}s", secs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = EchoConfig::default();
        assert_eq!(config.listen, None);
        assert!(config.connect.is_empty());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.idle_interval, 30);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
listen: "0.0.0.0:3755"
connect:
  - "10.0.0.5:3755"
  - "10.0.0.6:3755"
log_level: debug
idle_interval: 15
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = EchoConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.listen.as_deref(), Some("0.0.0.0:3755"));
        assert_eq!(config.connect, ["10.0.0.5:3755", "10.0.0.6:3755"]);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.idle_interval, 15);
        // Unspecified fields keep their defaults.
        assert_eq!(config.max_packet_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = EchoConfig::load_from_file("/nonexistent/echod.yaml").unwrap();
        assert_eq!(config.listen, None);
        assert_eq!(config.idle_interval, 30);
    }
}

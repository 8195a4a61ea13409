//! Node configuration with TOML file support.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lanmesh_network::{DiscoveryConfig, EstimatorConfig, TransportConfig, DEFAULT_MESSAGE_PORT};
use lanmesh_protocol::Encoding;
use lanmesh_types::{socket_addr_for, SIGNAL_LEVELS};

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for a lanmesh node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address advertised to peers (`ip` or `ip:port`). Resolved from the
    /// first non-loopback IPv4 interface when unset.
    #[serde(default)]
    pub local_address: Option<String>,

    /// Multicast group for discovery heartbeats.
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,

    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// TCP port the message listener binds.
    #[serde(default = "default_message_port")]
    pub message_port: u16,

    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,

    #[serde(default = "default_timeout_check_interval_ms")]
    pub timeout_check_interval_ms: u64,

    /// Silence after which a peer is evicted.
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,

    /// Pause between broadcast ticks.
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Wire encoding: "native" or "text". Every peer must agree.
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Link speed reported by the static link sensor.
    #[serde(default = "default_link_speed_mbps")]
    pub link_speed_mbps: u32,

    /// Signal strength reported by the static link sensor, `0..=10`.
    #[serde(default = "default_signal_strength")]
    pub signal_strength: u8,

    /// Oldest probe scan that may be reused.
    #[serde(default = "default_scan_cache_window_secs")]
    pub scan_cache_window_secs: u64,

    #[serde(default = "default_scan_history_limit")]
    pub scan_history_limit: usize,

    #[serde(default = "default_max_inbound_connections")]
    pub max_inbound_connections: usize,

    /// Connect to every newly discovered peer.
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_multicast_group() -> String {
    "230.0.0.1".to_string()
}

fn default_discovery_port() -> u16 {
    9998
}

fn default_message_port() -> u16 {
    DEFAULT_MESSAGE_PORT
}

fn default_discovery_interval_ms() -> u64 {
    50
}

fn default_timeout_check_interval_ms() -> u64 {
    500
}

fn default_peer_timeout_ms() -> u64 {
    3_000
}

fn default_broadcast_interval_ms() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

fn default_encoding() -> String {
    "native".to_string()
}

fn default_link_speed_mbps() -> u32 {
    54
}

fn default_signal_strength() -> u8 {
    SIGNAL_LEVELS
}

fn default_scan_cache_window_secs() -> u64 {
    30 * 60
}

fn default_scan_history_limit() -> usize {
    256
}

fn default_max_inbound_connections() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("NodeConfig is always serializable to TOML")
    }

    /// Reject values no node can run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.group()?;
        self.encoding()?;
        self.log_format
            .parse::<LogFormat>()
            .map_err(NodeError::Config)?;

        if let Some(address) = &self.local_address {
            socket_addr_for(address, self.message_port)
                .map_err(|e| NodeError::Config(e.to_string()))?;
        }
        for (name, value) in [
            ("discovery_interval_ms", self.discovery_interval_ms),
            ("timeout_check_interval_ms", self.timeout_check_interval_ms),
            ("peer_timeout_ms", self.peer_timeout_ms),
            ("broadcast_interval_ms", self.broadcast_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
        ] {
            if value == 0 {
                return Err(NodeError::Config(format!("{name} must be positive")));
            }
        }
        if self.signal_strength > SIGNAL_LEVELS {
            return Err(NodeError::Config(format!(
                "signal_strength must be at most {SIGNAL_LEVELS}"
            )));
        }
        if self.scan_history_limit == 0 {
            return Err(NodeError::Config("scan_history_limit must be positive".into()));
        }
        if self.max_inbound_connections == 0 {
            return Err(NodeError::Config(
                "max_inbound_connections must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn group(&self) -> Result<Ipv4Addr, NodeError> {
        let group: Ipv4Addr = self
            .multicast_group
            .parse()
            .map_err(|_| NodeError::Config(format!("bad multicast_group {:?}", self.multicast_group)))?;
        if !group.is_multicast() {
            return Err(NodeError::Config(format!("{group} is not a multicast address")));
        }
        Ok(group)
    }

    pub fn encoding(&self) -> Result<Encoding, NodeError> {
        match self.encoding.to_ascii_lowercase().as_str() {
            "native" => Ok(Encoding::Native),
            "text" => Ok(Encoding::Text),
            other => Err(NodeError::Config(format!(
                "unknown encoding {other:?} (expected \"native\" or \"text\")"
            ))),
        }
    }

    /// The configured log format, falling back to human-readable output.
    pub fn log_format(&self) -> LogFormat {
        self.log_format.parse().unwrap_or(LogFormat::Human)
    }

    pub fn discovery_config(&self, local_address: &str) -> Result<DiscoveryConfig, NodeError> {
        Ok(DiscoveryConfig {
            local_address: local_address.to_string(),
            group: self.group()?,
            port: self.discovery_port,
            interval: Duration::from_millis(self.discovery_interval_ms),
            timeout_check_interval: Duration::from_millis(self.timeout_check_interval_ms),
            peer_timeout: Duration::from_millis(self.peer_timeout_ms),
        })
    }

    pub fn transport_config(&self, local_address: &str) -> TransportConfig {
        let mut config = TransportConfig::new(local_address, self.message_port);
        config.max_inbound_connections = self.max_inbound_connections;
        config.broadcast_interval = Duration::from_millis(self.broadcast_interval_ms);
        config.auto_connect = self.auto_connect;
        config
    }

    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            scan_cache_window: Duration::from_secs(self.scan_cache_window_secs),
            scan_history_limit: self.scan_history_limit,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            local_address: None,
            multicast_group: default_multicast_group(),
            discovery_port: default_discovery_port(),
            message_port: default_message_port(),
            discovery_interval_ms: default_discovery_interval_ms(),
            timeout_check_interval_ms: default_timeout_check_interval_ms(),
            peer_timeout_ms: default_peer_timeout_ms(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            encoding: default_encoding(),
            link_speed_mbps: default_link_speed_mbps(),
            signal_strength: default_signal_strength(),
            scan_cache_window_secs: default_scan_cache_window_secs(),
            scan_history_limit: default_scan_history_limit(),
            max_inbound_connections: default_max_inbound_connections(),
            auto_connect: default_true(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.message_port, config.message_port);
        assert_eq!(parsed.peer_timeout_ms, config.peer_timeout_ms);
        assert_eq!(parsed.local_address, None);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.multicast_group, "230.0.0.1");
        assert_eq!(config.discovery_port, 9998);
        assert_eq!(config.message_port, 9999);
        assert_eq!(config.discovery_interval_ms, 50);
        assert_eq!(config.probe_timeout_ms, 1_000);
        assert_eq!(config.scan_cache_window_secs, 1_800);
        assert!(config.auto_connect);
        assert_eq!(config.log_format, "human");
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            local_address = "192.168.1.20"
            message_port = 7000
            encoding = "text"
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.local_address.as_deref(), Some("192.168.1.20"));
        assert_eq!(config.message_port, 7000);
        assert_eq!(config.encoding().unwrap(), Encoding::Text);
        assert_eq!(config.log_format, "human"); // default
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/lanmesh.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad = [
            NodeConfig {
                multicast_group: "10.0.0.1".into(),
                ..NodeConfig::default()
            },
            NodeConfig {
                encoding: "xml".into(),
                ..NodeConfig::default()
            },
            NodeConfig {
                peer_timeout_ms: 0,
                ..NodeConfig::default()
            },
            NodeConfig {
                signal_strength: 11,
                ..NodeConfig::default()
            },
            NodeConfig {
                local_address: Some("not an address".into()),
                ..NodeConfig::default()
            },
            NodeConfig {
                log_format: "xml".into(),
                ..NodeConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(NodeError::Config(_))), "{config:?}");
        }
    }

    #[test]
    fn sub_configs_carry_settings() {
        let config = NodeConfig {
            peer_timeout_ms: 1_234,
            max_inbound_connections: 3,
            auto_connect: false,
            ..NodeConfig::default()
        };
        let discovery = config.discovery_config("10.0.0.1").unwrap();
        assert_eq!(discovery.peer_timeout, Duration::from_millis(1_234));
        assert_eq!(discovery.group, Ipv4Addr::new(230, 0, 0, 1));

        let transport = config.transport_config("10.0.0.1");
        assert_eq!(transport.max_inbound_connections, 3);
        assert!(!transport.auto_connect);
        assert_eq!(transport.listen_addr.port(), 9999);
    }
}

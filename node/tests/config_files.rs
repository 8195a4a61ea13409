//! Config files on disk and property tests over the TOML round trip.

use std::io::Write;

use lanmesh_node::{NodeConfig, NodeError};
use proptest::prelude::*;

#[test]
fn config_file_is_loaded_from_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
        local_address = "10.1.2.3"
        peer_timeout_ms = 1500
        encoding = "text"
        "#
    )
    .unwrap();

    let config = NodeConfig::from_toml_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.local_address.as_deref(), Some("10.1.2.3"));
    assert_eq!(config.peer_timeout_ms, 1_500);
    assert_eq!(config.encoding, "text");
    config.validate().unwrap();
}

#[test]
fn malformed_file_is_a_config_error() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "peer_timeout_ms = \"soon\"").unwrap();
    assert!(matches!(
        NodeConfig::from_toml_file(file.path().to_str().unwrap()),
        Err(NodeError::Config(_))
    ));
}

proptest! {
    #[test]
    fn toml_round_trip_preserves_settings(
        port in 1u16..,
        peer_timeout in 1u64..100_000,
        speed in 0u32..10_000,
        signal in 0u8..=10,
        auto_connect in any::<bool>(),
        text in any::<bool>(),
    ) {
        let config = NodeConfig {
            message_port: port,
            peer_timeout_ms: peer_timeout,
            link_speed_mbps: speed,
            signal_strength: signal,
            auto_connect,
            encoding: if text { "text" } else { "native" }.to_string(),
            ..NodeConfig::default()
        };
        let parsed = NodeConfig::from_toml_str(&config.to_toml_string()).unwrap();
        prop_assert_eq!(parsed.message_port, port);
        prop_assert_eq!(parsed.peer_timeout_ms, peer_timeout);
        prop_assert_eq!(parsed.link_speed_mbps, speed);
        prop_assert_eq!(parsed.signal_strength, signal);
        prop_assert_eq!(parsed.auto_connect, auto_connect);
        prop_assert_eq!(&parsed.encoding, &config.encoding);
        prop_assert!(parsed.validate().is_ok());
    }
}

//! # File Output Tests
//!
//! Installs the global subscriber once with JSONL file output and checks
//! what lands in the file.

use tern_core::Address;
use tern_logging::{FileConfig, LogConfig, NodeContextGuard, RotationStrategy, TernSubscriberBuilder};

#[test]
fn test_jsonl_file_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = LogConfig::testing();
    config.default_level = "info".to_string();
    config.console.enabled = false;
    config.file = Some(FileConfig {
        directory: dir.path().to_path_buf(),
        prefix: "sim".to_string(),
        rotation: RotationStrategy::Never,
    });

    let guard = TernSubscriberBuilder::new().with_config(config).init().unwrap();
    {
        let _node = NodeContextGuard::simulated(Address::from_index(2));
        let span = tracing::info_span!("step", node = %Address::from_index(2));
        let _entered = span.enter();
        tracing::info!(dst = "10.0.0.9", "route discovered");
    }
    tracing::debug!("filtered out");

    // A second install must fail rather than panic
    assert!(TernSubscriberBuilder::new().with_console(false).init().is_err());

    drop(guard);
    let contents = std::fs::read_to_string(dir.path().join("sim.log")).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(lines.len(), 1);
    let event = &lines[0];
    assert_eq!(event["message"], "route discovered");
    assert_eq!(event["dst"], "10.0.0.9");
    assert_eq!(event["span"]["node"], "10.0.0.3");
}

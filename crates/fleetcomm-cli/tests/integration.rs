// ABOUTME: Integration tests for fleetcomm-cli.
// ABOUTME: Tests config checking and status line formatting.

use fleetcomm::{AgentId, AgentStatus, Position, StatusEvent, StatusRecord};
use fleetcomm_cli::{check, format_status};
use std::io::Write;
use tempfile::NamedTempFile;

// ============================================================================
// Config Check Tests
// ============================================================================

#[test]
fn test_check_reports_agent_counts() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [ports]
        status = 50101

        [[agents]]
        id = 1
        name = "amr1"
        ip_address = "192.168.10.21"

        [[agents]]
        id = 12
        name = "amr12"
        ip_address = ""
    "#
    )
    .unwrap();

    let summary = check(Some(file.path().to_path_buf())).unwrap();
    assert!(summary.contains("2 agents (1 with an address)"));
    assert!(summary.contains("status=50101"));
    assert!(summary.contains("control=48201"));
    assert!(summary.contains("  1\tamr1\t192.168.10.21"));
    assert!(summary.contains("  12\tamr12\t(unreachable)"));
}

#[test]
fn test_check_rejects_invalid_config() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [connection]
        jitter = 3.0
    "#
    )
    .unwrap();

    let err = check(Some(file.path().to_path_buf())).unwrap_err();
    assert!(format!("{:#}", err).contains("jitter"));
}

// ============================================================================
// Status Formatting Tests
// ============================================================================

#[test]
fn test_format_lifecycle_status() {
    let event = StatusEvent::new(AgentId::from(3), AgentStatus::Offline);
    let line = format_status(&event);
    assert!(line.ends_with("agent 3 offline"));
}

#[test]
fn test_format_telemetry() {
    let event = StatusEvent::new(
        AgentId::from(1),
        AgentStatus::Telemetry(StatusRecord {
            linear_velocity: 0.5,
            angular_velocity: -0.25,
            position: Some(Position::new(933.28, -428.75)),
        }),
    );
    let line = format_status(&event);
    assert!(line.ends_with("agent 1 telemetry linear=0.5 angular=-0.25 position=(933.28, -428.75)"));

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["agent_id"], "1");
    assert_eq!(json["status"], "telemetry");
    assert_eq!(json["linear_velocity"], 0.5);
}

// ABOUTME: Core data model shared by connections, links, the registry, and the router.
// ABOUTME: Agent identity and configuration, status records, commands, and connection states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, stable agent identifier.
///
/// Configuration may spell it as an integer or a string; both collapse to the
/// same canonical text so `7` and `"7"` address the same agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawAgentId", into = "String")]
pub struct AgentId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAgentId {
    Int(i64),
    Text(String),
}

impl From<RawAgentId> for AgentId {
    fn from(raw: RawAgentId) -> Self {
        match raw {
            RawAgentId::Int(n) => AgentId(n.to_string()),
            RawAgentId::Text(s) => AgentId(s.trim().to_string()),
        }
    }
}

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        AgentId(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for AgentId {
    fn from(n: i64) -> Self {
        AgentId(n.to_string())
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        AgentId::new(s)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        AgentId::new(s)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static description of one agent in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfiguration {
    pub id: AgentId,
    pub name: String,
    /// Address of the agent's firmware. Absent or blank means unreachable.
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl AgentConfiguration {
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ip_address: None,
        }
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// The usable address, if any. Whitespace-only addresses count as absent.
    pub fn address(&self) -> Option<&str> {
        self.ip_address
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }
}

/// A planar position in the agent's map frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Position {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Telemetry decoded from one status frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub linear_velocity: f64,
    pub angular_velocity: f64,
    pub position: Option<Position>,
}

/// What a subscriber learns about an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentStatus {
    /// The status link just came up; no telemetry yet.
    Idle,
    /// The status link dropped.
    Offline,
    Telemetry(StatusRecord),
}

impl AgentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Offline => "offline",
            AgentStatus::Telemetry(_) => "telemetry",
        }
    }
}

/// A status update for one agent, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub agent_id: AgentId,
    #[serde(flatten)]
    pub status: AgentStatus,
    pub received_at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(agent_id: AgentId, status: AgentStatus) -> Self {
        Self {
            agent_id,
            status,
            received_at: Utc::now(),
        }
    }
}

/// Velocity command for the control port.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCommand {
    pub agent_id: AgentId,
    pub linear_x: f64,
    pub angular_z: f64,
}

/// Goal position for the navigation port.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationCommand {
    pub agent_id: AgentId,
    pub position: Position,
}

/// Lifecycle of a single resilient connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Constructed, `connect()` not called yet.
    Disconnected,
    Connecting,
    Connected,
    /// Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One of the three connections an agent link maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Status,
    Control,
    Navigation,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Status => "status",
            Channel::Control => "control",
            Channel::Navigation => "navigation",
        };
        f.write_str(s)
    }
}

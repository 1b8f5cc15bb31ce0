// ABOUTME: Multi-agent telemetry and command transport for robot fleets.
// ABOUTME: Resilient TCP connections, per-agent links, a fleet registry, and a command router.

pub mod backoff;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod link;
pub mod registry;
pub mod router;
pub mod types;

// Reconnect timing
pub use backoff::{Backoff, BackoffPolicy};

// Wire framing
pub use codec::{
    format_fixed, parse_status, ControlEncoder, NavigationEncoder, StatusDecoder,
    CONTROL_TERMINATOR,
};

// Configuration
pub use config::{
    ConnectionConfig, FleetConfig, FramingConfig, PortConfig, CONTROL_CMD_PORT, MAP_DATA_PORT,
    NAVIGATION_CMD_PORT, STATUS_DATA_PORT,
};

// Transport
pub use connection::{ConnectionEvent, ConnectionSettings, EventReceiver, ResilientConnection};
pub use link::{AgentLink, LinkSettings};

// Fleet management and routing
pub use hub::{StatusHub, StatusSubscription};
pub use registry::{AddOutcome, AgentSummary, FleetRegistry};
pub use router::CommandRouter;

// Errors and data model
pub use error::{CommandDropped, DropReason, FleetError, Result};
pub use types::{
    AgentConfiguration, AgentId, AgentStatus, Channel, ConnectionState, ControlCommand,
    NavigationCommand, Position, StatusEvent, StatusRecord,
};

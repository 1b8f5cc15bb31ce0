// ABOUTME: Error types for the fleetcomm crate.
// ABOUTME: Covers connection, registry, routing, framing, and configuration failures.

use std::fmt;
use thiserror::Error;

use crate::types::{AgentId, Channel};

/// Why an outbound command never reached the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The target connection has no live session.
    NotConnected,
    /// The target connection was closed for good.
    Closed,
    /// The command carried NaN or an infinite value.
    NonFiniteValue,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::NotConnected => "not connected",
            DropReason::Closed => "connection closed",
            DropReason::NonFiniteValue => "non-finite value",
        };
        f.write_str(s)
    }
}

/// Report for a command that was dropped instead of sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDropped {
    pub agent_id: AgentId,
    pub channel: Channel,
    pub reason: DropReason,
}

impl fmt::Display for CommandDropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} command for agent {} dropped: {}",
            self.channel, self.agent_id, self.reason
        )
    }
}

/// Errors that can occur in the fleet transport.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Write attempted with no live session.
    #[error("not connected")]
    NotConnected,

    /// Operation on a connection after `close()`.
    #[error("connection closed")]
    Closed,

    /// An agent with this id is already registered.
    #[error("agent {0} is already registered")]
    DuplicateAgent(AgentId),

    /// No agent with this id is registered (or it is unreachable).
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    /// A command was dropped before reaching the wire.
    #[error("{0}")]
    CommandDropped(CommandDropped),

    /// An inbound frame could not be parsed.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// An inbound frame grew past the configured limit without a delimiter.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },

    /// An established session ended.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A connection or link was started outside a tokio runtime.
    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,

    /// Configuration loading or validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound serialization failed.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CommandDropped> for FleetError {
    fn from(dropped: CommandDropped) -> Self {
        FleetError::CommandDropped(dropped)
    }
}

/// Result type alias using FleetError.
pub type Result<T> = std::result::Result<T, FleetError>;

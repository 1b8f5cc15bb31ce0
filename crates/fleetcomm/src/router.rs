// ABOUTME: Command router and consumer-facing API over the fleet registry.
// ABOUTME: Addresses commands by agent id and fans status events out to subscribers.

use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::hub::{StatusHub, StatusSubscription};
use crate::link::{AgentLink, LinkSettings};
use crate::registry::{AddOutcome, AgentSummary, FleetRegistry};
use crate::types::{AgentConfiguration, AgentId, Position, StatusEvent};

/// Entry point for consumers: register agents, subscribe to status, send commands.
///
/// Registry mutation takes the write lock and routing takes the read lock, so
/// the router can be shared across tasks. Commands never wait on the network:
/// each call either hands bytes to a live session or reports why it could not.
pub struct CommandRouter {
    registry: RwLock<FleetRegistry>,
    hub: StatusHub,
}

impl CommandRouter {
    pub fn new(settings: LinkSettings) -> Self {
        let hub = StatusHub::new();
        Self {
            registry: RwLock::new(FleetRegistry::new(settings, hub.clone())),
            hub,
        }
    }

    /// Router using the timing, ports, and framing from a fleet config.
    /// Agents are not connected; see [`CommandRouter::connect_agent`].
    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.link_settings())
    }

    /// Register an agent and start its link.
    pub fn connect_agent(&self, config: AgentConfiguration) -> Result<AddOutcome> {
        self.registry
            .write()
            .expect("lock poisoned")
            .add_agent(config)
    }

    /// Close an agent's link and forget it.
    pub fn disconnect_agent(&self, id: &AgentId) -> Result<()> {
        self.registry
            .write()
            .expect("lock poisoned")
            .remove_agent(id)
    }

    /// Apply a changed agent configuration (recreating the link if needed).
    pub fn reconfigure_agent(&self, config: AgentConfiguration) -> Result<AddOutcome> {
        self.registry
            .write()
            .expect("lock poisoned")
            .reconfigure_agent(config)
    }

    /// Register a status listener for every agent. Drop the handle to stop.
    pub fn subscribe_status<F>(&self, callback: F) -> StatusSubscription
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.hub.subscribe(callback)
    }

    /// Alias for [`CommandRouter::subscribe_status`].
    pub fn on_status<F>(&self, callback: F) -> StatusSubscription
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.subscribe_status(callback)
    }

    /// Status events through a channel.
    pub fn status_channel(&self) -> (StatusSubscription, mpsc::UnboundedReceiver<StatusEvent>) {
        self.hub.subscribe_channel()
    }

    /// Route a velocity command.
    ///
    /// `UnknownAgent` when the id is not routable, `CommandDropped` when the
    /// control link is down.
    pub fn send_control(&self, id: &AgentId, linear_x: f64, angular_z: f64) -> Result<()> {
        self.route(id, |link| link.send_control(linear_x, angular_z))
    }

    /// Route a navigation goal.
    pub fn send_navigation(&self, id: &AgentId, position: impl Into<Position>) -> Result<()> {
        let position = position.into();
        self.route(id, |link| link.send_navigation(position))
    }

    pub fn agents(&self) -> Vec<AgentSummary> {
        self.registry.read().expect("lock poisoned").agents()
    }

    pub fn is_routable(&self, id: &AgentId) -> bool {
        self.registry.read().expect("lock poisoned").is_routable(id)
    }

    /// Close every link.
    pub fn shutdown(&self) {
        self.registry.write().expect("lock poisoned").shutdown();
    }

    fn route<F>(&self, id: &AgentId, send: F) -> Result<()>
    where
        F: FnOnce(&AgentLink) -> Result<()>,
    {
        let registry = self.registry.read().expect("lock poisoned");
        match registry.get(id) {
            Some(link) => send(link),
            None => {
                warn!(agent_id = %id, "command for unknown agent dropped");
                Err(FleetError::UnknownAgent(id.clone()))
            }
        }
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("hub", &self.hub)
            .finish()
    }
}

// ABOUTME: Fleet registry owning one agent link per agent id.
// ABOUTME: Adds, removes, and reconfigures agents; agents without an address are tracked as unreachable.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::hub::StatusHub;
use crate::link::{AgentLink, LinkSettings};
use crate::types::{AgentConfiguration, AgentId, Channel, ConnectionState};

/// Result of registering an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Links were created and are connecting.
    Linked,
    /// No address configured; tracked but not routable.
    Unreachable,
}

/// Point-in-time view of one registered agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub ip_address: Option<String>,
    pub reachable: bool,
    pub status: Option<ConnectionState>,
    pub control: Option<ConnectionState>,
    pub navigation: Option<ConnectionState>,
}

/// Owns every agent link. At most one entry exists per agent id.
#[derive(Debug)]
pub struct FleetRegistry {
    settings: LinkSettings,
    hub: StatusHub,
    links: HashMap<AgentId, AgentLink>,
    unreachable: HashMap<AgentId, AgentConfiguration>,
}

impl FleetRegistry {
    pub fn new(settings: LinkSettings, hub: StatusHub) -> Self {
        Self {
            settings,
            hub,
            links: HashMap::new(),
            unreachable: HashMap::new(),
        }
    }

    /// Register an agent and start its link.
    ///
    /// An absent or blank address is not an error: the agent is remembered as
    /// unreachable and no socket is opened.
    pub fn add_agent(&mut self, config: AgentConfiguration) -> Result<AddOutcome> {
        if self.contains(&config.id) {
            return Err(FleetError::DuplicateAgent(config.id));
        }

        if config.address().is_none() {
            info!(
                agent_id = %config.id,
                name = %config.name,
                "No ip address, tracking agent as unreachable"
            );
            self.unreachable.insert(config.id.clone(), config);
            return Ok(AddOutcome::Unreachable);
        }

        let id = config.id.clone();
        let link = AgentLink::start(config, &self.settings, self.hub.clone())?;
        self.links.insert(id, link);
        Ok(AddOutcome::Linked)
    }

    /// Close an agent's connections and forget it.
    pub fn remove_agent(&mut self, id: &AgentId) -> Result<()> {
        if let Some(mut link) = self.links.remove(id) {
            link.close();
            info!(agent_id = %id, "Agent removed");
            return Ok(());
        }
        if self.unreachable.remove(id).is_some() {
            info!(agent_id = %id, "Unreachable agent removed");
            return Ok(());
        }
        Err(FleetError::UnknownAgent(id.clone()))
    }

    /// Apply a changed configuration.
    ///
    /// Links are immutable, so any change to a linked agent tears the old link
    /// down and builds a new one. An identical configuration is a no-op.
    pub fn reconfigure_agent(&mut self, config: AgentConfiguration) -> Result<AddOutcome> {
        if let Some(link) = self.links.get(&config.id) {
            if *link.config() == config {
                debug!(agent_id = %config.id, "Configuration unchanged");
                return Ok(AddOutcome::Linked);
            }
            info!(agent_id = %config.id, "Configuration changed, recreating link");
            self.remove_agent(&config.id)?;
            return self.add_agent(config);
        }

        if self.unreachable.contains_key(&config.id) {
            if config.address().is_none() {
                self.unreachable.insert(config.id.clone(), config);
                return Ok(AddOutcome::Unreachable);
            }
            self.unreachable.remove(&config.id);
        }
        self.add_agent(config)
    }

    /// The link for a routable agent.
    pub fn get(&self, id: &AgentId) -> Option<&AgentLink> {
        self.links.get(id)
    }

    /// Whether the id is taken, routable or not.
    pub fn contains(&self, id: &AgentId) -> bool {
        self.links.contains_key(id) || self.unreachable.contains_key(id)
    }

    pub fn is_routable(&self, id: &AgentId) -> bool {
        self.links.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.links.len() + self.unreachable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summaries of every registered agent, sorted by id.
    pub fn agents(&self) -> Vec<AgentSummary> {
        let linked = self.links.values().map(|link| AgentSummary {
            id: link.id().clone(),
            name: link.config().name.clone(),
            ip_address: Some(link.address().to_string()),
            reachable: true,
            status: Some(link.state(Channel::Status)),
            control: Some(link.state(Channel::Control)),
            navigation: Some(link.state(Channel::Navigation)),
        });
        let unreachable = self.unreachable.values().map(|config| AgentSummary {
            id: config.id.clone(),
            name: config.name.clone(),
            ip_address: None,
            reachable: false,
            status: None,
            control: None,
            navigation: None,
        });

        let mut summaries: Vec<AgentSummary> = linked.chain(unreachable).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Close every link and forget every agent.
    pub fn shutdown(&mut self) {
        for (id, mut link) in self.links.drain() {
            link.close();
            debug!(agent_id = %id, "Link closed during shutdown");
        }
        self.unreachable.clear();
    }
}

impl Drop for FleetRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

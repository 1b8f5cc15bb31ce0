// ABOUTME: Parses and executes operator console commands.
// ABOUTME: Supports help, agents, ctl, nav, add, remove, and quit.

use fleetcomm::{AddOutcome, AgentConfiguration, AgentId, AgentSummary, CommandRouter, Result};
use tracing::info;

/// Parsed command from one line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Show help: `help` or an empty line
    Help,
    /// List registered agents: `agents`
    Agents,
    /// Velocity command: `ctl <id> <linear_x> <angular_z>`
    Control {
        id: AgentId,
        linear_x: f64,
        angular_z: f64,
    },
    /// Navigation goal: `nav <id> <x> <y>`
    Navigate { id: AgentId, x: f64, y: f64 },
    /// Register an agent: `add <id> <name> [ip]`
    Add(AgentConfiguration),
    /// Forget an agent: `remove <id>`
    Remove(AgentId),
    /// Leave the console: `quit` or `exit`
    Quit,
    /// Unrecognized input, with a hint.
    Unknown(String),
}

/// What the console should do after a command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

pub const HELP: &str = "\
Commands:
  agents                        list agents and link states
  ctl <id> <linear_x> <angular_z>  send a velocity command
  nav <id> <x> <y>              send a navigation goal
  add <id> <name> [ip]          register an agent
  remove <id>                   forget an agent
  help                          show this message
  quit                          close all links and exit";

impl Command {
    pub fn parse(text: &str) -> Command {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let Some((&head, args)) = parts.split_first() else {
            return Command::Help;
        };

        match head {
            "help" => Command::Help,
            "agents" | "ls" => Command::Agents,
            "quit" | "exit" => Command::Quit,
            "ctl" => match args {
                [id, lx, az] => match (lx.parse(), az.parse()) {
                    (Ok(linear_x), Ok(angular_z)) => Command::Control {
                        id: AgentId::new(*id),
                        linear_x,
                        angular_z,
                    },
                    _ => Command::Unknown("ctl (velocities must be numbers)".to_string()),
                },
                _ => Command::Unknown(
                    "ctl (requires <id> <linear_x> <angular_z>, e.g., ctl 1 0.5 0)".to_string(),
                ),
            },
            "nav" => match args {
                [id, x, y] => match (x.parse(), y.parse()) {
                    (Ok(x), Ok(y)) => Command::Navigate {
                        id: AgentId::new(*id),
                        x,
                        y,
                    },
                    _ => Command::Unknown("nav (coordinates must be numbers)".to_string()),
                },
                _ => Command::Unknown(
                    "nav (requires <id> <x> <y>, e.g., nav 1 933.28 -428.75)".to_string(),
                ),
            },
            "add" => match args {
                [id, name] => Command::Add(AgentConfiguration::new(*id, *name)),
                [id, name, ip] => {
                    Command::Add(AgentConfiguration::new(*id, *name).with_ip_address(*ip))
                }
                _ => Command::Unknown("add (requires <id> <name> [ip])".to_string()),
            },
            "remove" | "rm" => match args {
                [id] => Command::Remove(AgentId::new(*id)),
                _ => Command::Unknown("remove (requires <id>)".to_string()),
            },
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Execute a command against the router and return what to print.
pub fn execute_command(command: Command, router: &CommandRouter) -> Result<Reply> {
    match command {
        Command::Help => Ok(Reply::Text(HELP.to_string())),

        Command::Agents => {
            let agents = router.agents();
            if agents.is_empty() {
                return Ok(Reply::Text("No agents registered.".to_string()));
            }
            let lines: Vec<String> = agents.iter().map(format_summary).collect();
            Ok(Reply::Text(lines.join("\n")))
        }

        Command::Control {
            id,
            linear_x,
            angular_z,
        } => {
            router.send_control(&id, linear_x, angular_z)?;
            Ok(Reply::Text(format!(
                "sent ctl to {}: linear_x={} angular_z={}",
                id, linear_x, angular_z
            )))
        }

        Command::Navigate { id, x, y } => {
            router.send_navigation(&id, (x, y))?;
            Ok(Reply::Text(format!("sent nav to {}: ({}, {})", id, x, y)))
        }

        Command::Add(config) => {
            let id = config.id.clone();
            let outcome = router.connect_agent(config)?;
            info!(agent_id = %id, outcome = ?outcome, "Agent added from console");
            Ok(Reply::Text(match outcome {
                AddOutcome::Linked => format!("agent {} added, connecting", id),
                AddOutcome::Unreachable => {
                    format!("agent {} added without an address (unreachable)", id)
                }
            }))
        }

        Command::Remove(id) => {
            router.disconnect_agent(&id)?;
            Ok(Reply::Text(format!("agent {} removed", id)))
        }

        Command::Quit => Ok(Reply::Quit),

        Command::Unknown(text) => Ok(Reply::Text(format!(
            "Unknown command: {}\nType 'help' for the command list.",
            text
        ))),
    }
}

fn format_summary(agent: &AgentSummary) -> String {
    let state = |s: Option<fleetcomm::ConnectionState>| {
        s.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
    };
    format!(
        "{}\t{}\t{}\tstatus={} control={} navigation={}",
        agent.id,
        agent.name,
        agent.ip_address.as_deref().unwrap_or("-"),
        state(agent.status),
        state(agent.control),
        state(agent.navigation),
    )
}

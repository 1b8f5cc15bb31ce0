// ABOUTME: Operator console library for fleetcomm.
// ABOUTME: Connects the configured fleet, streams status to stdout, and executes stdin commands.

pub mod commands;

use anyhow::{Context, Result};
use fleetcomm::{AgentStatus, CommandRouter, FleetConfig, StatusEvent};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::commands::{execute_command, Command, Reply};

/// Load config, connect every agent, and run the console until quit, EOF, or Ctrl-C.
pub async fn run(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let config = FleetConfig::load(config_path).context("loading fleet config")?;
    let router = CommandRouter::from_config(&config);

    let (subscription, mut status_rx) = router.status_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = status_rx.recv().await {
            print_status(&event, json);
        }
    });

    for agent in config.agents.iter().cloned() {
        let id = agent.id.clone();
        if let Err(e) = router.connect_agent(agent) {
            warn!(agent_id = %id, error = %e, "Failed to add agent");
        }
    }
    info!(agents = config.agents.len(), "Fleet started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match execute_command(Command::parse(&line), &router) {
                    Ok(Reply::Text(text)) => println!("{}", text),
                    Ok(Reply::Quit) => break,
                    Err(e) => eprintln!("error: {}", e),
                }
            }
        }
    }

    router.shutdown();
    drop(subscription);
    printer.abort();
    info!("Fleet stopped");
    Ok(())
}

/// Load and validate the config, then describe it.
pub fn check(config_path: Option<PathBuf>) -> Result<String> {
    let config = FleetConfig::load(config_path).context("loading fleet config")?;
    let reachable = config
        .agents
        .iter()
        .filter(|agent| agent.address().is_some())
        .count();
    let mut out = format!(
        "config ok: {} agents ({} with an address), ports status={} control={} navigation={}",
        config.agents.len(),
        reachable,
        config.ports.status,
        config.ports.control,
        config.ports.navigation,
    );
    for agent in &config.agents {
        out.push_str(&format!(
            "\n  {}\t{}\t{}",
            agent.id,
            agent.name,
            agent.address().unwrap_or("(unreachable)")
        ));
    }
    Ok(out)
}

/// One status line for the console.
pub fn format_status(event: &StatusEvent) -> String {
    let time = event.received_at.format("%H:%M:%S%.3f");
    match &event.status {
        AgentStatus::Telemetry(record) => {
            let position = record
                .position
                .map(|p| format!("({:.2}, {:.2})", p.x, p.y))
                .unwrap_or_else(|| "-".to_string());
            format!(
                "[{}] agent {} telemetry linear={} angular={} position={}",
                time, event.agent_id, record.linear_velocity, record.angular_velocity, position
            )
        }
        status => format!("[{}] agent {} {}", time, event.agent_id, status.label()),
    }
}

fn print_status(event: &StatusEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to serialize status event"),
        }
    } else {
        println!("{}", format_status(event));
    }
}

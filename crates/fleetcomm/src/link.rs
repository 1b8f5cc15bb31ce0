// ABOUTME: Per-agent link bundling the status, control, and navigation connections.
// ABOUTME: Turns status bytes into published events and commands into framed writes.

use bytes::BytesMut;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

use crate::codec::{ControlEncoder, NavigationEncoder, StatusDecoder};
use crate::config::{FleetConfig, PortConfig};
use crate::connection::{ConnectionEvent, ConnectionSettings, EventReceiver, ResilientConnection};
use crate::error::{CommandDropped, DropReason, FleetError, Result};
use crate::hub::StatusHub;
use crate::types::{
    AgentConfiguration, AgentId, AgentStatus, Channel, ConnectionState, ControlCommand,
    NavigationCommand, Position, StatusEvent,
};

/// Everything needed to build an agent link besides the agent itself.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub connection: ConnectionSettings,
    pub ports: PortConfig,
    pub max_frame_bytes: usize,
    pub navigation_precision: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        FleetConfig::default().link_settings()
    }
}

/// Format `host:port`, bracketing bare IPv6 hosts.
pub fn endpoint(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// The three live connections for one agent.
///
/// Status transitions are republished through the [`StatusHub`]: `Idle` when
/// the status connection comes up, `Offline` when it drops, and one
/// `Telemetry` per decoded frame.
pub struct AgentLink {
    config: AgentConfiguration,
    address: String,
    status: ResilientConnection,
    control: ResilientConnection,
    navigation: ResilientConnection,
    navigation_encoder: NavigationEncoder,
    pump: JoinHandle<()>,
}

impl AgentLink {
    /// Open all three connections and start publishing status.
    ///
    /// Fails with `Config` if the agent has no usable address and with
    /// `NoRuntime` outside a tokio runtime. Nothing is spawned on failure.
    pub fn start(config: AgentConfiguration, settings: &LinkSettings, hub: StatusHub) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| FleetError::NoRuntime)?;
        let address = config
            .address()
            .ok_or_else(|| {
                FleetError::Config(format!("agent {} has no ip_address", config.id))
            })?
            .to_string();

        let ports = settings.ports;
        let (mut status, status_rx) =
            ResilientConnection::new(endpoint(&address, ports.status), settings.connection.clone());
        let (mut control, control_rx) = ResilientConnection::new(
            endpoint(&address, ports.control),
            settings.connection.clone(),
        );
        let (mut navigation, navigation_rx) = ResilientConnection::new(
            endpoint(&address, ports.navigation),
            settings.connection.clone(),
        );

        info!(
            agent_id = %config.id,
            name = %config.name,
            address = %address,
            "Starting TCP clients"
        );
        status.connect()?;
        control.connect()?;
        navigation.connect()?;

        let pump = runtime.spawn(pump(
            config.id.clone(),
            hub,
            StatusDecoder::new(settings.max_frame_bytes),
            status_rx,
            control_rx,
            navigation_rx,
        ));

        Ok(Self {
            config,
            address,
            status,
            control,
            navigation,
            navigation_encoder: NavigationEncoder::new(settings.navigation_precision),
            pump,
        })
    }

    pub fn id(&self) -> &AgentId {
        &self.config.id
    }

    pub fn config(&self) -> &AgentConfiguration {
        &self.config
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self, channel: Channel) -> ConnectionState {
        self.connection(channel).state()
    }

    /// Send a velocity command; reports `CommandDropped` when the control link is down.
    pub fn send_control(&self, linear_x: f64, angular_z: f64) -> Result<()> {
        let cmd = ControlCommand {
            agent_id: self.config.id.clone(),
            linear_x,
            angular_z,
        };
        let mut buf = BytesMut::new();
        ControlEncoder
            .encode(&cmd, &mut buf)
            .inspect_err(|e| self.log_drop(Channel::Control, e))?;
        self.write(Channel::Control, buf)
    }

    /// Send a navigation goal; reports `CommandDropped` when the navigation link is down.
    pub fn send_navigation(&self, position: Position) -> Result<()> {
        let cmd = NavigationCommand {
            agent_id: self.config.id.clone(),
            position,
        };
        let mut buf = BytesMut::new();
        let mut encoder = self.navigation_encoder;
        encoder
            .encode(&cmd, &mut buf)
            .inspect_err(|e| self.log_drop(Channel::Navigation, e))?;
        self.write(Channel::Navigation, buf)
    }

    /// Close all three connections and stop publishing. Idempotent.
    pub fn close(&mut self) {
        self.pump.abort();
        self.status.close();
        self.control.close();
        self.navigation.close();
    }

    fn connection(&self, channel: Channel) -> &ResilientConnection {
        match channel {
            Channel::Status => &self.status,
            Channel::Control => &self.control,
            Channel::Navigation => &self.navigation,
        }
    }

    fn write(&self, channel: Channel, buf: BytesMut) -> Result<()> {
        let connection = self.connection(channel);
        connection.write(buf.freeze()).map_err(|_| {
            let reason = if connection.is_closed() {
                DropReason::Closed
            } else {
                DropReason::NotConnected
            };
            let err = FleetError::CommandDropped(CommandDropped {
                agent_id: self.config.id.clone(),
                channel,
                reason,
            });
            self.log_drop(channel, &err);
            err
        })
    }

    fn log_drop(&self, channel: Channel, err: &FleetError) {
        warn!(
            agent_id = %self.config.id,
            channel = %channel,
            error = %err,
            "command dropped"
        );
    }
}

impl Drop for AgentLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AgentLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLink")
            .field("id", &self.config.id)
            .field("address", &self.address)
            .field("status", &self.status.state())
            .field("control", &self.control.state())
            .field("navigation", &self.navigation.state())
            .finish()
    }
}

async fn pump(
    agent_id: AgentId,
    hub: StatusHub,
    mut decoder: StatusDecoder,
    mut status_rx: EventReceiver,
    mut control_rx: EventReceiver,
    mut navigation_rx: EventReceiver,
) {
    let mut buf = BytesMut::new();
    loop {
        tokio::select! {
            event = status_rx.recv() => match event {
                Some(event) => on_status_event(&agent_id, &hub, &mut decoder, &mut buf, event),
                None => break,
            },
            Some(event) = control_rx.recv() => on_command_channel_event(&agent_id, Channel::Control, event),
            Some(event) = navigation_rx.recv() => on_command_channel_event(&agent_id, Channel::Navigation, event),
        }
    }
    debug!(agent_id = %agent_id, "status pump stopped");
}

fn on_status_event(
    agent_id: &AgentId,
    hub: &StatusHub,
    decoder: &mut StatusDecoder,
    buf: &mut BytesMut,
    event: ConnectionEvent,
) {
    match event {
        ConnectionEvent::Connecting { attempt } => {
            debug!(agent_id = %agent_id, attempt, "status link connecting");
        }
        ConnectionEvent::Connected => {
            buf.clear();
            decoder.reset();
            info!(agent_id = %agent_id, "status link connected");
            hub.publish(&StatusEvent::new(agent_id.clone(), AgentStatus::Idle));
        }
        ConnectionEvent::Disconnected { reason } => {
            buf.clear();
            decoder.reset();
            info!(agent_id = %agent_id, reason = %reason, "status link lost");
            hub.publish(&StatusEvent::new(agent_id.clone(), AgentStatus::Offline));
        }
        ConnectionEvent::Data(bytes) => {
            buf.extend_from_slice(&bytes);
            loop {
                match decoder.decode(buf) {
                    Ok(Some(record)) => {
                        hub.publish(&StatusEvent::new(
                            agent_id.clone(),
                            AgentStatus::Telemetry(record),
                        ));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(agent_id = %agent_id, error = %e, "dropping status frame");
                    }
                }
            }
        }
    }
}

fn on_command_channel_event(agent_id: &AgentId, channel: Channel, event: ConnectionEvent) {
    match event {
        ConnectionEvent::Connecting { attempt } => {
            debug!(agent_id = %agent_id, channel = %channel, attempt, "command link connecting");
        }
        ConnectionEvent::Connected => {
            info!(agent_id = %agent_id, channel = %channel, "command link connected");
        }
        ConnectionEvent::Disconnected { reason } => {
            info!(agent_id = %agent_id, channel = %channel, reason = %reason, "command link lost");
        }
        ConnectionEvent::Data(bytes) => {
            debug!(
                agent_id = %agent_id,
                channel = %channel,
                bytes = bytes.len(),
                "ignoring inbound bytes on command link"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_formatting() {
        assert_eq!(endpoint("10.0.0.5", 48101), "10.0.0.5:48101");
        assert_eq!(endpoint("amr1.local", 48201), "amr1.local:48201");
        assert_eq!(endpoint("::1", 48202), "[::1]:48202");
        assert_eq!(endpoint("[::1]", 48202), "[::1]:48202");
    }

    #[test]
    fn test_default_settings_use_firmware_ports() {
        let settings = LinkSettings::default();
        assert_eq!(settings.ports.status, 48101);
        assert_eq!(settings.ports.control, 48201);
        assert_eq!(settings.ports.navigation, 48202);
        assert_eq!(settings.navigation_precision, 2);
    }

    #[tokio::test]
    async fn test_start_requires_address() {
        let config = AgentConfiguration::new(1, "amr1");
        let err = AgentLink::start(config, &LinkSettings::default(), StatusHub::new()).unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn test_start_outside_runtime_reports_error() {
        let config = AgentConfiguration::new(1, "amr1").with_ip_address("127.0.0.1");
        let err = AgentLink::start(config, &LinkSettings::default(), StatusHub::new()).unwrap_err();
        assert!(matches!(err, FleetError::NoRuntime));
    }

    #[tokio::test]
    async fn test_decodes_data_and_skips_malformed() {
        let hub = StatusHub::new();
        let (_sub, mut rx) = hub.subscribe_channel();
        let agent_id = AgentId::from(3);
        let mut decoder = StatusDecoder::default();
        let mut buf = BytesMut::new();

        on_status_event(&agent_id, &hub, &mut decoder, &mut buf, ConnectionEvent::Connected);
        on_status_event(
            &agent_id,
            &hub,
            &mut decoder,
            &mut buf,
            ConnectionEvent::Data(bytes::Bytes::from_static(b"{oops}\n{\"cmd_vel\":{\"lin")),
        );
        on_status_event(
            &agent_id,
            &hub,
            &mut decoder,
            &mut buf,
            ConnectionEvent::Data(bytes::Bytes::from_static(b"ear\":{\"x\":0.4}}}\n")),
        );
        on_status_event(
            &agent_id,
            &hub,
            &mut decoder,
            &mut buf,
            ConnectionEvent::Disconnected {
                reason: "closed by peer".into(),
            },
        );

        assert_eq!(rx.recv().await.unwrap().status, AgentStatus::Idle);
        match rx.recv().await.unwrap().status {
            AgentStatus::Telemetry(record) => assert_eq!(record.linear_velocity, 0.4),
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(rx.recv().await.unwrap().status, AgentStatus::Offline);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_partial_frame_discarded_on_reconnect() {
        let hub = StatusHub::new();
        let (_sub, mut rx) = hub.subscribe_channel();
        let agent_id = AgentId::from(3);
        let mut decoder = StatusDecoder::default();
        let mut buf = BytesMut::new();

        on_status_event(
            &agent_id,
            &hub,
            &mut decoder,
            &mut buf,
            ConnectionEvent::Data(bytes::Bytes::from_static(b"{\"cmd_vel\":")),
        );
        on_status_event(&agent_id, &hub, &mut decoder, &mut buf, ConnectionEvent::Connected);
        on_status_event(
            &agent_id,
            &hub,
            &mut decoder,
            &mut buf,
            ConnectionEvent::Data(bytes::Bytes::from_static(b"{}\n")),
        );

        assert_eq!(rx.recv().await.unwrap().status, AgentStatus::Idle);
        assert_eq!(
            rx.recv().await.unwrap().status,
            AgentStatus::Telemetry(Default::default())
        );
    }
}

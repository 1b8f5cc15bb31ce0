// ABOUTME: Auto-reconnecting TCP connection to a single (host, port).
// ABOUTME: Emits ordered lifecycle and data events; writes drop-and-report when no session is live.

use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error::{FleetError, Result};
use crate::types::ConnectionState;

const READ_CHUNK: usize = 4096;

/// Timing knobs for a resilient connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub backoff: BackoffPolicy,
    /// Upper bound for a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Everything a connection reports to its owner, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connect attempt is starting (1-based, reset after each success).
    Connecting { attempt: u32 },
    Connected,
    /// An established session ended. Not emitted for failed attempts.
    Disconnected { reason: String },
    Data(Bytes),
}

pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;
type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

#[derive(Debug)]
struct Session {
    state: ConnectionState,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
}

type SharedSession = Arc<Mutex<Session>>;

/// A TCP client that keeps reconnecting until closed.
///
/// Construction is inert; `connect()` spawns the I/O task. `close()` (or drop)
/// cancels any pending reconnect, releases the socket and drops the event
/// sender so the receiver sees end-of-stream.
pub struct ResilientConnection {
    address: String,
    settings: ConnectionSettings,
    session: SharedSession,
    cancel: CancellationToken,
    events: Option<EventSender>,
    task: Option<JoinHandle<()>>,
}

impl ResilientConnection {
    /// Create a connection to `address` ("host:port") and the receiver for its events.
    pub fn new(address: impl Into<String>, settings: ConnectionSettings) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Self {
            address: address.into(),
            settings,
            session: Arc::new(Mutex::new(Session {
                state: ConnectionState::Disconnected,
                writer: None,
            })),
            cancel: CancellationToken::new(),
            events: Some(tx),
            task: None,
        };
        (connection, rx)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.session.lock().expect("lock poisoned").state
    }

    /// Start connecting. A no-op while already running.
    ///
    /// Fails with `NoRuntime` when called outside a tokio runtime; the
    /// connection is left untouched and may be connected later.
    pub fn connect(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FleetError::Closed);
        }
        if self.events.is_none() {
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| FleetError::NoRuntime)?;
        let Some(events) = self.events.take() else {
            return Ok(());
        };

        self.session.lock().expect("lock poisoned").state = ConnectionState::Connecting;

        self.task = Some(runtime.spawn(run(
            self.address.clone(),
            self.settings.clone(),
            self.session.clone(),
            self.cancel.clone(),
            events,
        )));
        Ok(())
    }

    /// Hand bytes to the live session.
    ///
    /// Returns `NotConnected` immediately when there is no session, including
    /// after `close()`. Nothing is buffered across reconnects.
    pub fn write(&self, bytes: impl Into<Bytes>) -> Result<()> {
        let session = self.session.lock().expect("lock poisoned");
        match &session.writer {
            Some(writer) if session.state == ConnectionState::Connected => writer
                .send(bytes.into())
                .map_err(|_| FleetError::NotConnected),
            _ => Err(FleetError::NotConnected),
        }
    }

    /// Stop for good. Idempotent.
    pub fn close(&mut self) {
        self.cancel.cancel();
        {
            let mut session = self.session.lock().expect("lock poisoned");
            session.state = ConnectionState::Closed;
            session.writer = None;
        }
        self.events = None;
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(address = %self.address, "connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ResilientConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ResilientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientConnection")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

fn emit(events: &EventSender, cancel: &CancellationToken, event: ConnectionEvent) {
    if !cancel.is_cancelled() {
        // A dropped receiver only means nobody listens any more.
        let _ = events.send(event);
    }
}

fn set_state(session: &SharedSession, state: ConnectionState) -> bool {
    let mut session = session.lock().expect("lock poisoned");
    if session.state == ConnectionState::Closed {
        return false;
    }
    session.state = state;
    true
}

async fn run(
    address: String,
    settings: ConnectionSettings,
    session: SharedSession,
    cancel: CancellationToken,
    events: EventSender,
) {
    let mut backoff = Backoff::new(settings.backoff.clone());
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        if !set_state(&session, ConnectionState::Connecting) {
            return;
        }
        emit(&events, &cancel, ConnectionEvent::Connecting { attempt });
        debug!(address = %address, attempt, "connecting");

        let connect = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(&address));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = connect => result,
        };

        match result {
            Ok(Ok(stream)) => {
                backoff.reset();
                attempt = 0;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(address = %address, error = %e, "failed to set TCP_NODELAY");
                }

                let (writer, outbound) = mpsc::unbounded_channel();
                {
                    let mut guard = session.lock().expect("lock poisoned");
                    if guard.state == ConnectionState::Closed {
                        return;
                    }
                    guard.state = ConnectionState::Connected;
                    guard.writer = Some(writer);
                }
                info!(address = %address, "connected");
                emit(&events, &cancel, ConnectionEvent::Connected);

                let ended = run_session(&address, stream, outbound, &cancel, &events).await;

                {
                    let mut guard = session.lock().expect("lock poisoned");
                    guard.writer = None;
                    if guard.state != ConnectionState::Closed {
                        guard.state = ConnectionState::Connecting;
                    }
                }

                match ended {
                    Some(err) => {
                        info!(address = %address, error = %err, "disconnected");
                        emit(
                            &events,
                            &cancel,
                            ConnectionEvent::Disconnected {
                                reason: err.to_string(),
                            },
                        );
                    }
                    None => return,
                }
            }
            Ok(Err(e)) => {
                debug!(address = %address, attempt, error = %e, "connect failed");
            }
            Err(_) => {
                debug!(
                    address = %address,
                    attempt,
                    timeout_ms = settings.connect_timeout.as_millis() as u64,
                    "connect timed out"
                );
            }
        }

        let delay = backoff.next_delay();
        debug!(
            address = %address,
            delay_ms = delay.as_millis() as u64,
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Pump one established session. Returns why it was lost, or `None` when cancelled.
async fn run_session(
    address: &str,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Option<FleetError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    let lost = loop {
        buf.reserve(READ_CHUNK);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break FleetError::ConnectionLost("closed by peer".to_string()),
                Ok(_) => emit(events, cancel, ConnectionEvent::Data(buf.split().freeze())),
                Err(e) => break FleetError::Io(e),
            },
            next = outbound.recv() => match next {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        warn!(address = %address, bytes = bytes.len(), error = %e, "write failed, dropping payload");
                        break FleetError::Io(e);
                    }
                }
                None => return None,
            },
        }
    };

    outbound.close();
    let mut dropped = 0usize;
    while let Ok(bytes) = outbound.try_recv() {
        dropped += bytes.len();
    }
    if dropped > 0 {
        warn!(address = %address, bytes = dropped, "session ended with unsent writes, dropped");
    }

    Some(lost)
}

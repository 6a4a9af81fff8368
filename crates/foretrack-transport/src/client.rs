//! Transport client: command writer and event fan-out
//!
//! One client per agent connection. A background writer task serializes
//! commands onto the write side of the transport, and a reader task parses
//! incoming lines and broadcasts them to every subscriber. Cloneable
//! [`TransportHandle`]s are the only surface consumers touch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tracing::{debug, error, info, trace, warn};

use foretrack_core::{Error, Result};

use crate::agent::AgentProcess;
use crate::protocol::{encode_command, parse_transport_event, TransportCommand, TransportEvent};

/// Buffered commands waiting for the writer task.
const CMD_CHANNEL_CAPACITY: usize = 32;

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Cloneable handle for sending commands and subscribing to events.
#[derive(Clone)]
pub struct TransportHandle {
    cmd_tx: mpsc::Sender<TransportCommand>,
    event_tx: broadcast::Sender<TransportEvent>,
}

impl TransportHandle {
    /// Queue a command for the agent.
    pub async fn send(&self, command: TransportCommand) -> Result<()> {
        trace!("Transport: queueing {}", command.name());
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| Error::channel_send("transport command channel"))
    }

    /// Subscribe to the event stream. Each receiver sees every event from
    /// the moment of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }

    /// Create a detached handle with no transport behind it.
    ///
    /// Returns the handle plus the raw command receiver, so tests can
    /// observe emitted commands and inject events via [`Self::emit_event`].
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn new_for_test() -> (Self, mpsc::Receiver<TransportCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (Self { cmd_tx, event_tx }, cmd_rx)
    }

    /// Push an event to all subscribers, as if the agent had sent it.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn emit_event(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("subscribers", &self.event_tx.receiver_count())
            .finish()
    }
}

/// An open connection to a transport agent, over stdio or TCP.
pub struct TransportClient {
    handle: TransportHandle,
    agent: Option<AgentProcess>,
    writer_stop: Option<oneshot::Sender<()>>,
    closed: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
}

impl TransportClient {
    /// Spawn an agent subprocess and speak the protocol over its stdio.
    pub fn spawn_agent(command: &str, args: &[String]) -> Result<Self> {
        let (agent, stdin, stdout) = AgentProcess::spawn(command, args)?;
        Ok(Self::from_io(stdin, stdout, Some(agent)))
    }

    /// Connect to an already-running agent over TCP.
    pub async fn connect_tcp(addr: &str) -> Result<Self> {
        info!("Connecting to transport agent at {}", addr);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::connect_failed(addr, e.to_string()))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self::from_io(write_half, read_half, None))
    }

    fn from_io<W, R>(writer: W, reader: R, agent: Option<AgentProcess>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let close_notify = Arc::new(Notify::new());

        tokio::spawn(command_writer(writer, cmd_rx, stop_rx));
        tokio::spawn(event_reader(
            reader,
            event_tx.clone(),
            Arc::clone(&closed),
            Arc::clone(&close_notify),
        ));

        Self {
            handle: TransportHandle { cmd_tx, event_tx },
            agent,
            writer_stop: Some(stop_tx),
            closed,
            close_notify,
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// True once the event stream has ended (agent exit or peer close).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until the event stream ends.
    pub async fn wait_closed(&self) {
        let notified = self.close_notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Exit code of the spawned agent, if any. Always `None` in TCP mode.
    pub fn exit_code(&self) -> Option<i32> {
        self.agent.as_ref().and_then(|a| a.exit_code())
    }

    /// Close the write side, then give a spawned agent `timeout` to exit
    /// before force-killing it.
    pub async fn shutdown(&mut self, timeout: Duration) {
        debug!("Transport: shutting down");
        if let Some(stop_tx) = self.writer_stop.take() {
            let _ = stop_tx.send(());
        }
        if let Some(agent) = self.agent.as_mut() {
            agent.shutdown(timeout).await;
        }
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("agent", &self.agent)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Serializes queued commands as newline-delimited JSON.
///
/// Dropping the writer on exit closes the write side of the transport,
/// which is what signals EOF to a spawned agent during shutdown.
async fn command_writer<W>(
    mut writer: W,
    mut cmd_rx: mpsc::Receiver<TransportCommand>,
    mut stop_rx: oneshot::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let cmd = match cmd {
                    Some(cmd) => cmd,
                    None => {
                        debug!("Transport: command channel closed");
                        break;
                    }
                };
                let line = match encode_command(&cmd) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Transport: failed to encode {}: {}", cmd.name(), e);
                        continue;
                    }
                };
                trace!("Transport: >> {}", line);
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!("Transport: write failed: {}", e);
                    break;
                }
                if let Err(e) = writer.write_all(b"\n").await {
                    error!("Transport: write failed: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!("Transport: flush failed: {}", e);
                    break;
                }
            }
            _ = &mut stop_rx => {
                debug!("Transport: writer stop requested");
                break;
            }
        }
    }
    debug!("Transport: command writer finished");
}

/// Parses incoming lines and broadcasts the events.
async fn event_reader<R>(
    reader: R,
    event_tx: broadcast::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        trace!("Transport: << {}", line);
        match parse_transport_event(&line) {
            Some(event) => {
                if event_tx.send(event).is_err() {
                    trace!("Transport: no event subscribers, dropping");
                }
            }
            None => {
                warn!("Transport: ignoring malformed line: {}", line);
            }
        }
    }

    closed.store(true, Ordering::Release);
    close_notify.notify_waiters();
    info!("Transport: event stream ended");
}

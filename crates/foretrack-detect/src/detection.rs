//! Foreground process detection coordinator
//!
//! One worker task per coordinator instance. The worker owns all mutable
//! detection state and consumes two sources in a single select loop: the
//! transport's broadcast event stream, and a control channel fed by the
//! public [`ForegroundProcessDetection`] handle. Everything downstream of
//! the constructor happens on the worker, so no detection state needs a
//! lock of its own.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use foretrack_core::{Device, Error, ForegroundProcess, ProcessEntry, Result, StreamId, SupportType};
use foretrack_transport::{
    ForegroundProcessEvent, HandshakeResult, StreamConnected, StreamDisconnected, TransportCommand,
    TransportEvent, TransportHandle,
};

use crate::metrics::{MetricsSink, TransportFault};
use crate::registry::SupportRegistry;
use crate::selection::{next_instance_id, InstanceId, SelectionRegistry};
use crate::session::PollingSession;

const CONTROL_CHANNEL_CAPACITY: usize = 32;

/// Callback invoked for every foreground process observation.
pub type ForegroundProcessListener = Box<dyn FnMut(&Device, &ForegroundProcess) + Send>;

enum ControlMessage {
    StartPolling { device: Device },
    StopPolling,
    SelectProcess { entry: ProcessEntry },
    AddListener {
        listener: ForegroundProcessListener,
        ack: oneshot::Sender<()>,
    },
    SelectedDevice {
        response_tx: oneshot::Sender<Option<Device>>,
    },
    Dispose,
}

/// Handle to a running detection coordinator.
///
/// Dropping the handle (or calling [`Self::dispose`]) stops the worker,
/// which releases this instance's selection interest and stops its tracked
/// device unless another instance still holds it.
pub struct ForegroundProcessDetection {
    control_tx: mpsc::Sender<ControlMessage>,
    instance_id: InstanceId,
}

impl ForegroundProcessDetection {
    /// Spawn a coordinator on the given transport.
    ///
    /// The event subscription is taken before the worker is spawned, so no
    /// event emitted after `new` returns can be missed. Coordinators that
    /// share a transport must also share the [`SelectionRegistry`].
    /// `on_device_disconnected` fires once per disconnect of any connected
    /// device, after the coordinator has dropped its state for it.
    pub fn new<F>(
        transport: TransportHandle,
        selection: SelectionRegistry,
        metrics: Arc<dyn MetricsSink>,
        on_device_disconnected: F,
        poll_interval_ms: u64,
    ) -> Self
    where
        F: Fn(Device) + Send + Sync + 'static,
    {
        let instance_id = next_instance_id();
        let events = transport.subscribe();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

        let worker = DetectionWorker {
            instance_id,
            transport,
            registry: SupportRegistry::new(),
            session: PollingSession::new(instance_id, selection, poll_interval_ms),
            metrics,
            on_device_disconnected: Box::new(on_device_disconnected),
            listeners: Vec::new(),
            connected: HashMap::new(),
            last_timestamps: HashMap::new(),
        };
        tokio::spawn(worker.run(events, control_rx));

        Self {
            control_tx,
            instance_id,
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Select a device for foreground process tracking.
    pub async fn start_polling(&self, device: Device) -> Result<()> {
        self.send(ControlMessage::StartPolling { device }).await
    }

    /// Stop tracking the selected device.
    pub async fn stop_polling(&self) -> Result<()> {
        self.send(ControlMessage::StopPolling).await
    }

    /// Note a process selection. A running process on a device whose
    /// support is still `UNKNOWN` triggers a handshake retry.
    pub async fn select_process(&self, entry: ProcessEntry) -> Result<()> {
        self.send(ControlMessage::SelectProcess { entry }).await
    }

    /// Register a listener for foreground process events.
    ///
    /// Resolves once the worker has the listener in place; every event
    /// handled afterwards reaches it. Listeners run in registration order.
    pub async fn add_foreground_process_listener<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut(&Device, &ForegroundProcess) + Send + 'static,
    {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(ControlMessage::AddListener {
            listener: Box::new(listener),
            ack: ack_tx,
        })
        .await?;
        ack_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// The device this instance currently has selected.
    pub async fn selected_device(&self) -> Result<Option<Device>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ControlMessage::SelectedDevice { response_tx })
            .await?;
        response_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Stop the worker. Idempotent; pending operations after this fail
    /// with a channel error.
    pub async fn dispose(&self) {
        let _ = self.control_tx.send(ControlMessage::Dispose).await;
    }

    async fn send(&self, message: ControlMessage) -> Result<()> {
        self.control_tx
            .send(message)
            .await
            .map_err(|_| Error::channel_send("detection control channel"))
    }
}

impl std::fmt::Debug for ForegroundProcessDetection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForegroundProcessDetection")
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

/// Owns all detection state; runs until disposed or the transport closes.
struct DetectionWorker {
    instance_id: InstanceId,
    transport: TransportHandle,
    registry: SupportRegistry,
    session: PollingSession,
    metrics: Arc<dyn MetricsSink>,
    on_device_disconnected: Box<dyn Fn(Device) + Send + Sync>,
    listeners: Vec<ForegroundProcessListener>,
    connected: HashMap<StreamId, Device>,
    // Survives stream disconnects: a reconnect continues the same clock.
    last_timestamps: HashMap<StreamId, i64>,
}

impl DetectionWorker {
    async fn run(
        mut self,
        mut events: broadcast::Receiver<TransportEvent>,
        mut control_rx: mpsc::Receiver<ControlMessage>,
    ) {
        debug!("Detection worker {} started", self.instance_id);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Detection worker {} lagged behind the transport, skipped {} events",
                            self.instance_id, skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Transport event stream closed");
                        break;
                    }
                },
                message = control_rx.recv() => match message {
                    Some(message) => {
                        if !self.handle_control(message).await {
                            break;
                        }
                    }
                    None => {
                        debug!("All detection handles dropped");
                        break;
                    }
                },
            }
        }

        for command in self.session.release_selected() {
            self.send(command).await;
        }
        debug!("Detection worker {} stopped", self.instance_id);
    }

    /// Returns false when the worker should stop.
    async fn handle_control(&mut self, message: ControlMessage) -> bool {
        match message {
            ControlMessage::StartPolling { device } => {
                let Some(stream_id) = self.stream_for(&device.id) else {
                    warn!("Cannot track {}: device is not connected", device.id);
                    return true;
                };
                let support = self.registry.support(&device.id);
                for command in self.session.start_polling(&device, stream_id, support) {
                    self.send(command).await;
                }
            }
            ControlMessage::StopPolling => {
                for command in self.session.stop_polling() {
                    self.send(command).await;
                }
            }
            ControlMessage::SelectProcess { entry } => self.on_select_process(entry).await,
            ControlMessage::AddListener { listener, ack } => {
                self.listeners.push(listener);
                let _ = ack.send(());
            }
            ControlMessage::SelectedDevice { response_tx } => {
                let _ = response_tx.send(self.session.selected_device().cloned());
            }
            ControlMessage::Dispose => {
                debug!("Detection worker {} disposing", self.instance_id);
                return false;
            }
        }
        true
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        if let (Some(stream_id), Some(timestamp_ns)) = (event.stream_id(), event.timestamp_ns()) {
            self.observe_timestamp(stream_id, timestamp_ns, &event);
        }
        match event {
            TransportEvent::StreamConnected(ev) => self.on_stream_connected(ev).await,
            TransportEvent::StreamDisconnected(ev) => self.on_stream_disconnected(ev),
            TransportEvent::HandshakeResult(ev) => self.on_handshake_result(ev).await,
            TransportEvent::ForegroundProcess(ev) => self.on_foreground_process(ev),
            TransportEvent::Unknown { event, .. } => {
                trace!("Ignoring unknown transport event '{}'", event);
            }
        }
    }

    /// Flags streams whose clock runs backwards. Each regression is
    /// reported once; the offending timestamp is then adopted as the new
    /// last-seen value.
    fn observe_timestamp(&mut self, stream_id: StreamId, timestamp_ns: i64, event: &TransportEvent) {
        if let Some(&last) = self.last_timestamps.get(&stream_id) {
            if timestamp_ns < last {
                let device_id = self.device_id_for(stream_id, event);
                warn!(
                    "Timestamps on stream {} went backwards: {} after {}",
                    stream_id, timestamp_ns, last
                );
                self.metrics
                    .report_transport_fault(TransportFault::OldTimestampBiggerThanNew, &device_id);
            }
        }
        self.last_timestamps.insert(stream_id, timestamp_ns);
    }

    fn device_id_for(&self, stream_id: StreamId, event: &TransportEvent) -> String {
        if let TransportEvent::StreamConnected(ev) = event {
            return ev.device.id.clone();
        }
        self.connected
            .get(&stream_id)
            .map(|device| device.id.clone())
            .unwrap_or_else(|| format!("stream-{}", stream_id))
    }

    async fn on_stream_connected(&mut self, ev: StreamConnected) {
        let stream_id = ev.stream_id;
        let device_id = ev.device.id.clone();
        info!("Stream {} connected: {}", stream_id, ev.device.display_name());
        self.connected.insert(stream_id, ev.device);

        if self.registry.is_terminal(&device_id) {
            debug!("Support for {} already known, skipping handshake", device_id);
            return;
        }
        self.issue_handshake(stream_id, &device_id).await;
    }

    fn on_stream_disconnected(&mut self, ev: StreamDisconnected) {
        let Some(device) = self.connected.remove(&ev.stream_id) else {
            debug!("Disconnect for unknown stream {}", ev.stream_id);
            return;
        };
        info!("Stream {} disconnected: {}", ev.stream_id, device.display_name());

        self.registry.discard(&device.id);
        if self.session.clear_on_disconnect(&device.id) {
            debug!("Selected device {} disconnected", device.id);
        }
        (self.on_device_disconnected)(device);
    }

    async fn on_handshake_result(&mut self, ev: HandshakeResult) {
        let Some(device) = self.connected.get(&ev.stream_id).cloned() else {
            debug!("Handshake result for unknown stream {}", ev.stream_id);
            return;
        };
        self.registry.finish_handshake(&device.id);
        self.registry.record(&device.id, ev.support);
        match ev.reason {
            Some(reason) => info!("Device {} support: {:?} ({:?})", device.id, ev.support, reason),
            None => info!("Device {} support: {:?}", device.id, ev.support),
        }

        match ev.support {
            SupportType::Supported => {
                if self.session.selected_device_id() == Some(device.id.as_str()) {
                    for command in self.session.confirm_support(&device.id) {
                        self.send(command).await;
                    }
                } else if self.session.selected_device().is_none() {
                    info!("No device selected, auto-selecting {}", device.display_name());
                    for command in
                        self.session
                            .start_polling(&device, ev.stream_id, Some(SupportType::Supported))
                    {
                        self.send(command).await;
                    }
                }
            }
            SupportType::NotSupported => self.session.mark_not_supported(&device.id),
            SupportType::Unknown => {}
        }
    }

    fn on_foreground_process(&mut self, ev: ForegroundProcessEvent) {
        let Some(device) = self.connected.get(&ev.stream_id) else {
            debug!("Foreground process event for unknown stream {}", ev.stream_id);
            return;
        };
        let process = ForegroundProcess::new(ev.pid, ev.process_name);
        trace!(
            "Foreground on {}: {} (pid {})",
            device.id,
            process.process_name,
            process.pid
        );
        for listener in self.listeners.iter_mut() {
            listener(device, &process);
        }
    }

    async fn on_select_process(&mut self, entry: ProcessEntry) {
        if !entry.is_running {
            debug!("Ignoring selection of dead process {}", entry.name);
            return;
        }
        let Some(stream_id) = self.stream_for(&entry.device_id) else {
            debug!("Process {} is on a disconnected device, ignoring", entry.name);
            return;
        };
        match self.registry.support(&entry.device_id) {
            Some(SupportType::Unknown) => {
                debug!(
                    "Support for {} still unknown, retrying handshake",
                    entry.device_id
                );
                self.issue_handshake(stream_id, &entry.device_id).await;
            }
            // Terminal answers stay; no answer means the connect-time
            // handshake is still in flight.
            _ => {}
        }
    }

    async fn issue_handshake(&mut self, stream_id: StreamId, device_id: &str) {
        if !self.registry.begin_handshake(device_id) {
            debug!("Handshake for {} already outstanding", device_id);
            return;
        }
        self.send(TransportCommand::capability_handshake(stream_id, device_id))
            .await;
    }

    fn stream_for(&self, device_id: &str) -> Option<StreamId> {
        self.connected
            .iter()
            .find(|(_, device)| device.id == device_id)
            .map(|(&stream_id, _)| stream_id)
    }

    async fn send(&mut self, command: TransportCommand) {
        debug!(
            "Detection {}: {} for {}",
            self.instance_id,
            command.name(),
            command.device_id()
        );
        if let Err(e) = self.transport.send(command).await {
            warn!("Failed to send transport command: {}", e);
        }
    }
}

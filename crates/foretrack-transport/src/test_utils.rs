//! Shared helpers for tests that drive a transport consumer.

use std::time::Duration;

use tokio::sync::mpsc;

use foretrack_core::{Device, ReasonNotSupported, StreamId, SupportType};

use crate::client::TransportHandle;
use crate::protocol::{
    ForegroundProcessEvent, HandshakeResult, StreamConnected, StreamDisconnected, TransportCommand,
    TransportEvent,
};

/// A device with plausible defaults for tests.
pub fn test_device(id: &str) -> Device {
    Device::new(id, "Google", "Pixel 7", 34)
}

/// An in-memory stand-in for a transport agent.
///
/// Commands sent through the handle land in [`FakeTransport::recv_command`];
/// events injected here reach every subscriber of the handle.
pub struct FakeTransport {
    handle: TransportHandle,
    commands: mpsc::Receiver<TransportCommand>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let (handle, commands) = TransportHandle::new_for_test();
        Self { handle, commands }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Next command "received by the agent". Panics after one second so a
    /// missing command fails the test instead of hanging it.
    pub async fn recv_command(&mut self) -> TransportCommand {
        tokio::time::timeout(Duration::from_secs(1), self.commands.recv())
            .await
            .expect("timed out waiting for a transport command")
            .expect("transport command channel closed")
    }

    /// Command already queued, if any. Does not wait.
    pub fn try_recv_command(&mut self) -> Option<TransportCommand> {
        self.commands.try_recv().ok()
    }

    pub fn send_event(&self, event: TransportEvent) {
        self.handle.emit_event(event);
    }

    pub fn connect_device(&self, stream_id: StreamId, device: &Device, timestamp_ns: i64) {
        self.send_event(TransportEvent::StreamConnected(StreamConnected {
            stream_id,
            device: device.clone(),
            timestamp_ns,
        }));
    }

    pub fn disconnect_device(&self, stream_id: StreamId, timestamp_ns: i64) {
        self.send_event(TransportEvent::StreamDisconnected(StreamDisconnected {
            stream_id,
            timestamp_ns,
        }));
    }

    pub fn send_handshake_result(
        &self,
        stream_id: StreamId,
        support: SupportType,
        reason: Option<ReasonNotSupported>,
        timestamp_ns: i64,
    ) {
        self.send_event(TransportEvent::HandshakeResult(HandshakeResult {
            stream_id,
            support,
            reason,
            timestamp_ns,
        }));
    }

    pub fn send_foreground_process(
        &self,
        stream_id: StreamId,
        pid: i32,
        process_name: &str,
        timestamp_ns: i64,
    ) {
        self.send_event(TransportEvent::ForegroundProcess(ForegroundProcessEvent {
            stream_id,
            pid,
            process_name: process_name.to_string(),
            timestamp_ns,
        }));
    }
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport").finish()
    }
}

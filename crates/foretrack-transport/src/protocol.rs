//! Transport agent protocol: newline-delimited JSON over stdio or TCP
//!
//! Commands flow to the agent, one JSON object per line, tagged by `command`.
//! Events flow back, one JSON object per line, tagged by `event`. Every event
//! carries the agent-side timestamp in nanoseconds.

use foretrack_core::{Device, ReasonNotSupported, Result, StreamId, SupportType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command sent to the transport agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum TransportCommand {
    /// Probe a device for foreground process detection support.
    #[serde(rename_all = "camelCase")]
    CapabilityHandshake { stream_id: StreamId, device_id: String },

    /// Begin polling the device for its foreground process.
    #[serde(rename_all = "camelCase")]
    StartTracking {
        stream_id: StreamId,
        device_id: String,
        poll_interval_ms: u64,
    },

    /// Stop polling the device.
    #[serde(rename_all = "camelCase")]
    StopTracking { stream_id: StreamId, device_id: String },
}

impl TransportCommand {
    pub fn capability_handshake(stream_id: StreamId, device_id: impl Into<String>) -> Self {
        Self::CapabilityHandshake {
            stream_id,
            device_id: device_id.into(),
        }
    }

    pub fn start_tracking(
        stream_id: StreamId,
        device_id: impl Into<String>,
        poll_interval_ms: u64,
    ) -> Self {
        Self::StartTracking {
            stream_id,
            device_id: device_id.into(),
            poll_interval_ms,
        }
    }

    pub fn stop_tracking(stream_id: StreamId, device_id: impl Into<String>) -> Self {
        Self::StopTracking {
            stream_id,
            device_id: device_id.into(),
        }
    }

    /// Wire name of the command, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CapabilityHandshake { .. } => "capabilityHandshake",
            Self::StartTracking { .. } => "startTracking",
            Self::StopTracking { .. } => "stopTracking",
        }
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::CapabilityHandshake { stream_id, .. }
            | Self::StartTracking { stream_id, .. }
            | Self::StopTracking { stream_id, .. } => *stream_id,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            Self::CapabilityHandshake { device_id, .. }
            | Self::StartTracking { device_id, .. }
            | Self::StopTracking { device_id, .. } => device_id,
        }
    }
}

/// Serialize a command as a single wire line (without the trailing newline).
pub fn encode_command(command: &TransportCommand) -> Result<String> {
    Ok(serde_json::to_string(command)?)
}

/// A new device stream opened on the transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConnected {
    pub stream_id: StreamId,
    pub device: Device,
    pub timestamp_ns: i64,
}

/// A device stream closed on the transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDisconnected {
    pub stream_id: StreamId,
    pub timestamp_ns: i64,
}

/// The agent's answer to a capability handshake.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResult {
    pub stream_id: StreamId,
    pub support: SupportType,
    #[serde(default)]
    pub reason: Option<ReasonNotSupported>,
    pub timestamp_ns: i64,
}

/// A foreground process observation from a tracked device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundProcessEvent {
    pub stream_id: StreamId,
    pub pid: i32,
    pub process_name: String,
    pub timestamp_ns: i64,
}

/// An event received from the transport agent.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StreamConnected(StreamConnected),
    StreamDisconnected(StreamDisconnected),
    HandshakeResult(HandshakeResult),
    ForegroundProcess(ForegroundProcessEvent),

    /// An event kind this build does not understand. Kept for logging.
    Unknown { event: String, payload: Value },
}

impl TransportEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::StreamConnected(_) => "streamConnected",
            Self::StreamDisconnected(_) => "streamDisconnected",
            Self::HandshakeResult(_) => "handshakeResult",
            Self::ForegroundProcess(_) => "foregroundProcess",
            Self::Unknown { event, .. } => event,
        }
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Self::StreamConnected(ev) => Some(ev.stream_id),
            Self::StreamDisconnected(ev) => Some(ev.stream_id),
            Self::HandshakeResult(ev) => Some(ev.stream_id),
            Self::ForegroundProcess(ev) => Some(ev.stream_id),
            Self::Unknown { .. } => None,
        }
    }

    pub fn timestamp_ns(&self) -> Option<i64> {
        match self {
            Self::StreamConnected(ev) => Some(ev.timestamp_ns),
            Self::StreamDisconnected(ev) => Some(ev.timestamp_ns),
            Self::HandshakeResult(ev) => Some(ev.timestamp_ns),
            Self::ForegroundProcess(ev) => Some(ev.timestamp_ns),
            Self::Unknown { .. } => None,
        }
    }
}

/// Parse one line from the agent.
///
/// Returns `None` for lines that are not JSON objects tagged with `event`.
/// Recognized event names with a payload that fails to decode fall back to
/// [`TransportEvent::Unknown`] rather than tearing down the stream.
pub fn parse_transport_event(line: &str) -> Option<TransportEvent> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let event = value.get("event")?.as_str()?.to_string();
    Some(parse_event(event, value))
}

fn parse_event(event: String, payload: Value) -> TransportEvent {
    match event.as_str() {
        "streamConnected" => serde_json::from_value(payload.clone())
            .map(TransportEvent::StreamConnected)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "streamDisconnected" => serde_json::from_value(payload.clone())
            .map(TransportEvent::StreamDisconnected)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "handshakeResult" => serde_json::from_value(payload.clone())
            .map(TransportEvent::HandshakeResult)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "foregroundProcess" => serde_json::from_value(payload.clone())
            .map(TransportEvent::ForegroundProcess)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        _ => unknown_event(event, payload),
    }
}

fn unknown_event(event: String, payload: Value) -> TransportEvent {
    TransportEvent::Unknown { event, payload }
}

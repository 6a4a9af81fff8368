//! Structured JSON event output for the foretrack binary
//!
//! Detection results are printed to stdout as structured JSON events so
//! scripts and IDE integrations can consume them without scraping log text.
//! Human-oriented diagnostics go to the log file instead (see
//! `foretrack_core::logging`).
//!
//! # Event Format
//!
//! Events are output as NDJSON (newline-delimited JSON), one event per line.
//! Each event has an "event" field indicating its type, along with event-specific data.
//!
//! # Example Output
//!
//! ```json
//! {"event":"foreground_process","device_id":"emulator-5554","device_name":"Google Pixel 7","pid":4711,"process_name":"com.example.app","timestamp":1704700001000}
//! {"event":"device_disconnected","device_id":"emulator-5554","device_name":"Google Pixel 7","timestamp":1704700002000}
//! ```

use chrono::Utc;
use serde::Serialize;
use std::io::{self, Write};
use tracing::{error, warn};

use foretrack_core::{Device, ForegroundProcess};
use foretrack_detect::{MetricsSink, TransportFault};

/// Events emitted on stdout
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutputEvent {
    /// A device reported a new foreground process
    ForegroundProcess {
        device_id: String,
        device_name: String,
        pid: i32,
        process_name: String,
        timestamp: i64,
    },

    /// The tracked device disconnected from the transport
    DeviceDisconnected {
        device_id: String,
        device_name: String,
        timestamp: i64,
    },

    /// The transport misbehaved (e.g. delivered out-of-order timestamps)
    TransportFault {
        fault: String,
        device_id: String,
        timestamp: i64,
    },

    /// The transport agent process exited
    AgentExited {
        code: Option<i32>,
        timestamp: i64,
    },
}

impl OutputEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        // Serialize to JSON
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize output event: {}", e);
                return;
            }
        };

        // Write to stdout with newline (NDJSON format)
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write output event to stdout: {}", e);
            return;
        }

        // Flush to ensure immediate output
        if let Err(e) = stdout.flush() {
            error!("Failed to flush output stdout: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn foreground_process(device: &Device, process: &ForegroundProcess) -> Self {
        Self::ForegroundProcess {
            device_id: device.id.clone(),
            device_name: device.display_name(),
            pid: process.pid,
            process_name: process.process_name.clone(),
            timestamp: Self::now(),
        }
    }

    pub fn device_disconnected(device: &Device) -> Self {
        Self::DeviceDisconnected {
            device_id: device.id.clone(),
            device_name: device.display_name(),
            timestamp: Self::now(),
        }
    }

    pub fn transport_fault(fault: TransportFault, device_id: &str) -> Self {
        Self::TransportFault {
            fault: fault.as_str().to_string(),
            device_id: device_id.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn agent_exited(code: Option<i32>) -> Self {
        Self::AgentExited {
            code,
            timestamp: Self::now(),
        }
    }
}

/// Metrics sink that mirrors transport faults onto stdout and the log.
///
/// Used as the binary's fault reporter so consumers of the NDJSON stream
/// see corrupted-transport incidents alongside the process events they
/// may have skewed.
pub struct StdoutMetricsSink;

impl MetricsSink for StdoutMetricsSink {
    fn report_transport_fault(&self, fault: TransportFault, device_id: &str) {
        warn!("Transport fault {} on device {}", fault, device_id);
        OutputEvent::transport_fault(fault, device_id).emit();
    }
}

//! # foretrack-detect - Foreground Process Detection
//!
//! Coordinates foreground process detection over a transport agent:
//! probes each connected device for support, tracks at most one device per
//! coordinator instance, and fans incoming foreground process events out to
//! registered listeners. Several instances can share one transport; a
//! shared selection registry keeps one instance from stopping a device
//! another instance still watches.
//!
//! ## Public API
//!
//! **Coordinator:**
//! - [`ForegroundProcessDetection`] - handle to a running worker
//! - [`ForegroundProcessListener`] - per-event callback type
//!
//! **State:**
//! - [`SupportRegistry`] - per-device handshake results
//! - [`SelectionRegistry`] - cross-instance device interest
//! - [`PollingSession`] - per-instance tracking state machine
//!
//! **Health:**
//! - [`MetricsSink`], [`TransportFault`] - transport fault reporting

pub mod detection;
pub mod metrics;
pub mod registry;
pub mod selection;
pub mod session;

pub use detection::{ForegroundProcessDetection, ForegroundProcessListener};
pub use metrics::{LoggingMetricsSink, MetricsSink, TransportFault};
pub use registry::SupportRegistry;
pub use selection::{next_instance_id, InstanceId, SelectionRegistry};
pub use session::PollingSession;

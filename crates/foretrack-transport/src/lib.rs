//! # foretrack-transport - Transport Agent Protocol
//!
//! Speaks the newline-delimited JSON protocol of a foreground process
//! transport agent, either over the stdio of a spawned agent subprocess or
//! over TCP to an agent that is already running:
//!
//! - Commands out: `capabilityHandshake`, `startTracking`, `stopTracking`
//! - Events in: `streamConnected`, `streamDisconnected`, `handshakeResult`,
//!   `foregroundProcess`
//!
//! ## Public API
//!
//! **Client:**
//! - [`TransportClient`] - owns the connection and its IO tasks
//! - [`TransportHandle`] - cloneable sender/subscriber surface
//!
//! **Protocol:**
//! - [`TransportCommand`], [`TransportEvent`] - wire messages
//! - [`encode_command`], [`parse_transport_event`] - line codecs
//!
//! **Agent process:**
//! - [`AgentProcess`] - spawned agent lifecycle with graceful shutdown

pub mod agent;
pub mod client;
pub mod protocol;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use agent::AgentProcess;
pub use client::{TransportClient, TransportHandle};
pub use protocol::{
    encode_command, parse_transport_event, ForegroundProcessEvent, HandshakeResult,
    StreamConnected, StreamDisconnected, TransportCommand, TransportEvent,
};

//! Per-device support cache and handshake bookkeeping
//!
//! Tracks what each connected device answered to the capability handshake.
//! `SUPPORTED` and `NOT_SUPPORTED` are terminal for the lifetime of the
//! entry; `UNKNOWN` may be retried. Entries are discarded when the device's
//! stream closes, so a reconnecting device is probed again.

use std::collections::{HashMap, HashSet};

use foretrack_core::SupportType;

/// Cache of handshake results, keyed by device id.
#[derive(Debug, Default)]
pub struct SupportRegistry {
    support: HashMap<String, SupportType>,
    outstanding: HashSet<String>,
}

impl SupportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handshake result for a device.
    pub fn record(&mut self, device_id: &str, support: SupportType) {
        self.support.insert(device_id.to_string(), support);
    }

    /// The cached result for a device, if it answered a handshake.
    pub fn support(&self, device_id: &str) -> Option<SupportType> {
        self.support.get(device_id).copied()
    }

    /// True when the cached result will never change for this entry.
    pub fn is_terminal(&self, device_id: &str) -> bool {
        self.support(device_id).is_some_and(|s| s.is_terminal())
    }

    /// Drop all state for a device. Called when its stream closes.
    pub fn discard(&mut self, device_id: &str) {
        self.support.remove(device_id);
        self.outstanding.remove(device_id);
    }

    /// Mark a handshake as in flight. Returns `false` when one is already
    /// outstanding for the device, in which case no new probe may be sent.
    pub fn begin_handshake(&mut self, device_id: &str) -> bool {
        self.outstanding.insert(device_id.to_string())
    }

    /// Clear the in-flight marker once the result arrives.
    pub fn finish_handshake(&mut self, device_id: &str) {
        self.outstanding.remove(device_id);
    }

    pub fn handshake_outstanding(&self, device_id: &str) -> bool {
        self.outstanding.contains(device_id)
    }
}

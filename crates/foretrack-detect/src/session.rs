//! Per-instance polling session state machine
//!
//! At most one device per coordinator instance is tracked at a time. The
//! session decides which `startTracking`/`stopTracking` commands a selection
//! change requires, in strict stop-before-start order, and consults the
//! shared [`SelectionRegistry`] so a device still selected elsewhere is
//! never stopped out from under another instance.
//!
//! Methods return the commands to emit instead of sending them; the
//! coordinator worker owns the transport handle.

use foretrack_core::{Device, StreamId, SupportType};
use foretrack_transport::TransportCommand;
use tracing::{debug, warn};

use crate::selection::{InstanceId, SelectionRegistry};

/// Tracking phase of the currently selected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for a handshake to confirm support before starting.
    Deferred,
    /// `startTracking` has been emitted.
    Polling,
    /// The device answered `NOT_SUPPORTED`; it will never be tracked.
    NotSupported,
}

#[derive(Debug, Clone)]
struct Selected {
    device: Device,
    stream_id: StreamId,
    phase: Phase,
}

/// Polling state for one coordinator instance.
#[derive(Debug)]
pub struct PollingSession {
    instance_id: InstanceId,
    selection: SelectionRegistry,
    selected: Option<Selected>,
    poll_interval_ms: u64,
}

impl PollingSession {
    pub fn new(
        instance_id: InstanceId,
        selection: SelectionRegistry,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            instance_id,
            selection,
            selected: None,
            poll_interval_ms,
        }
    }

    pub fn selected_device(&self) -> Option<&Device> {
        self.selected.as_ref().map(|s| &s.device)
    }

    pub fn selected_device_id(&self) -> Option<&str> {
        self.selected.as_ref().map(|s| s.device.id.as_str())
    }

    pub fn is_polling(&self) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|s| s.phase == Phase::Polling)
    }

    /// Select a device for tracking.
    ///
    /// Any previously polled device is stopped first (unless another
    /// instance still holds it), so the returned commands never start a new
    /// device before stopping the old one. With `SUPPORTED` cached the start
    /// is emitted immediately; with no result or `UNKNOWN` the start is
    /// deferred until [`Self::confirm_support`]; `NOT_SUPPORTED` selections
    /// produce no commands at all.
    pub fn start_polling(
        &mut self,
        device: &Device,
        stream_id: StreamId,
        support: Option<SupportType>,
    ) -> Vec<TransportCommand> {
        if self.selected_device_id() == Some(device.id.as_str()) {
            debug!("Device {} already selected, nothing to do", device.id);
            return Vec::new();
        }

        let mut commands = self.release_selected();

        self.selection.add_interest(self.instance_id, &device.id);
        let phase = match support {
            Some(SupportType::Supported) => {
                commands.push(TransportCommand::start_tracking(
                    stream_id,
                    &device.id,
                    self.poll_interval_ms,
                ));
                Phase::Polling
            }
            Some(SupportType::NotSupported) => {
                debug!("Device {} does not support detection, not tracking", device.id);
                Phase::NotSupported
            }
            Some(SupportType::Unknown) | None => {
                debug!("Deferring start for {} until its handshake answers", device.id);
                Phase::Deferred
            }
        };
        self.selected = Some(Selected {
            device: device.clone(),
            stream_id,
            phase,
        });
        commands
    }

    /// Stop tracking the selected device.
    ///
    /// When another instance still holds the device the stop is suppressed
    /// and the session keeps its state, so a later stop request can emit the
    /// command once the other instance has let go. Without a polled device
    /// this only clears the selection.
    pub fn stop_polling(&mut self) -> Vec<TransportCommand> {
        let Some(selected) = self.selected.as_ref() else {
            debug!("Stop requested with no device selected");
            return Vec::new();
        };

        if selected.phase == Phase::Polling
            && self.selection.held_by_others(self.instance_id, &selected.device.id)
        {
            warn!(
                "Not stopping {}: still selected by another instance",
                selected.device.id
            );
            return Vec::new();
        }

        self.release_selected()
    }

    /// A handshake answered `SUPPORTED` for the device. Emits the deferred
    /// start if this device is the current selection.
    pub fn confirm_support(&mut self, device_id: &str) -> Vec<TransportCommand> {
        match self.selected.as_mut() {
            Some(selected)
                if selected.device.id == device_id && selected.phase == Phase::Deferred =>
            {
                selected.phase = Phase::Polling;
                vec![TransportCommand::start_tracking(
                    selected.stream_id,
                    device_id,
                    self.poll_interval_ms,
                )]
            }
            _ => Vec::new(),
        }
    }

    /// A handshake answered `NOT_SUPPORTED` for the device. A deferred
    /// selection stays selected but will never start.
    pub fn mark_not_supported(&mut self, device_id: &str) {
        if let Some(selected) = self.selected.as_mut() {
            if selected.device.id == device_id && selected.phase == Phase::Deferred {
                selected.phase = Phase::NotSupported;
            }
        }
    }

    /// The selected device's stream closed. Clears the selection without
    /// emitting anything; there is no stream left to command. Returns true
    /// when the device was the current selection.
    pub fn clear_on_disconnect(&mut self, device_id: &str) -> bool {
        if self.selected_device_id() != Some(device_id) {
            return false;
        }
        if let Some(old) = self.selected.take() {
            self.selection.remove_interest(self.instance_id, &old.device.id);
        }
        true
    }

    /// Release the selection unconditionally, stopping the device when no
    /// other instance holds it. Used on selection switch and disposal.
    pub fn release_selected(&mut self) -> Vec<TransportCommand> {
        let Some(old) = self.selected.take() else {
            return Vec::new();
        };

        let mut commands = Vec::new();
        if old.phase == Phase::Polling {
            if self.selection.held_by_others(self.instance_id, &old.device.id) {
                warn!(
                    "Not stopping {}: still selected by another instance",
                    old.device.id
                );
            } else {
                commands.push(TransportCommand::stop_tracking(old.stream_id, &old.device.id));
            }
        }
        self.selection.remove_interest(self.instance_id, &old.device.id);
        commands
    }
}

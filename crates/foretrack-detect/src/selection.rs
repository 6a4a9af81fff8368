//! Cross-instance selection interest registry
//!
//! Several detection coordinators can share one transport. Before a
//! coordinator emits `stopTracking` for a device, it must check whether any
//! other coordinator still has that device selected; if so, the stop is
//! suppressed and the device keeps polling. This registry is the shared
//! record of who currently holds which device.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

/// Identifies one coordinator instance within the process.
pub type InstanceId = u64;

static INSTANCE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Next unique coordinator instance id.
pub fn next_instance_id() -> InstanceId {
    INSTANCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Shared map of device id to the instances that have it selected.
///
/// Clones share the same underlying map; every coordinator multiplexed onto
/// a transport should be constructed with a clone of the same registry.
#[derive(Debug, Clone, Default)]
pub struct SelectionRegistry {
    inner: Arc<Mutex<HashMap<String, HashSet<InstanceId>>>>,
}

impl SelectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `instance_id` has the device selected.
    pub fn add_interest(&self, instance_id: InstanceId, device_id: &str) {
        let mut map = self.lock();
        map.entry(device_id.to_string())
            .or_default()
            .insert(instance_id);
        trace!("Selection: instance {} holds {}", instance_id, device_id);
    }

    /// Drop `instance_id`'s claim on the device.
    pub fn remove_interest(&self, instance_id: InstanceId, device_id: &str) {
        let mut map = self.lock();
        if let Some(holders) = map.get_mut(device_id) {
            holders.remove(&instance_id);
            if holders.is_empty() {
                map.remove(device_id);
            }
        }
        trace!("Selection: instance {} released {}", instance_id, device_id);
    }

    /// True when an instance other than `instance_id` holds the device.
    pub fn held_by_others(&self, instance_id: InstanceId, device_id: &str) -> bool {
        let map = self.lock();
        map.get(device_id)
            .map(|holders| holders.iter().any(|&id| id != instance_id))
            .unwrap_or(false)
    }

    /// Number of instances currently holding the device.
    pub fn interest_count(&self, device_id: &str) -> usize {
        self.lock().get(device_id).map(HashSet::len).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashSet<InstanceId>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

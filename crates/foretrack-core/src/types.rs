//! Domain types shared across Foretrack crates
//!
//! Defines:
//! - `Device` - A device visible to the transport agent
//! - `SupportType` / `ReasonNotSupported` - Capability handshake outcomes
//! - `ForegroundProcess` - A process reported as foreground on a device
//! - `ProcessEntry` - A selectable process in a process list

use serde::{Deserialize, Serialize};

/// Identifier for one device connection epoch on the transport.
///
/// A device that disconnects and reconnects keeps its `Device::id` but
/// arrives on a fresh stream.
pub type StreamId = i64;

/// Connection state of a device as last reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    #[default]
    Online,
    Offline,
}

/// A device visible to the transport agent.
///
/// Identity is the serial (`id`); the remaining fields are descriptive
/// and fixed for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,

    #[serde(default)]
    pub manufacturer: String,

    #[serde(default)]
    pub model: String,

    /// Device OS API level, 0 when unknown.
    #[serde(default)]
    pub api_level: i32,

    #[serde(default)]
    pub state: DeviceState,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        manufacturer: impl Into<String>,
        model: impl Into<String>,
        api_level: i32,
    ) -> Self {
        Self {
            id: id.into(),
            manufacturer: manufacturer.into(),
            model: model.into(),
            api_level,
            state: DeviceState::Online,
        }
    }

    pub fn with_state(mut self, state: DeviceState) -> Self {
        self.state = state;
        self
    }

    /// Human-readable name, falling back to the serial when the agent
    /// reported no manufacturer/model.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.manufacturer, self.model);
        let name = name.trim();
        if name.is_empty() {
            self.id.clone()
        } else {
            name.to_string()
        }
    }
}

/// Outcome of the capability handshake for one device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupportType {
    Supported,
    NotSupported,
    Unknown,
}

impl SupportType {
    /// Terminal results are never re-negotiated for the same connection.
    /// Only `Unknown` is retried, and only when a process on the device
    /// is (re)selected.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SupportType::Unknown)
    }
}

/// The device-side tool whose absence makes tracking impossible.
///
/// Carried alongside a `NOT_SUPPORTED` handshake result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonNotSupported {
    DumpsysNotFound,
    GrepNotFound,
}

/// A process reported as being in the foreground on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundProcess {
    pub pid: i32,
    pub process_name: String,
}

impl ForegroundProcess {
    pub fn new(pid: i32, process_name: impl Into<String>) -> Self {
        Self {
            pid,
            process_name: process_name.into(),
        }
    }
}

/// A process a user can pick from a device's process list.
///
/// Selecting a running entry on a device whose support is still
/// `Unknown` triggers a handshake retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub device_id: String,
    pub pid: i32,
    pub name: String,
    pub is_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display_name() {
        let device = Device::new("serial-1", "Google", "Pixel 7", 33);
        assert_eq!(device.display_name(), "Google Pixel 7");
    }

    #[test]
    fn test_device_display_name_falls_back_to_id() {
        let device = Device::new("serial-2", "", "", 0);
        assert_eq!(device.display_name(), "serial-2");
    }

    #[test]
    fn test_device_serde_camel_case() {
        let device = Device::new("abc", "Acme", "Widget", 30);
        let json = serde_json::to_string(&device).unwrap();
        assert!(json.contains("\"apiLevel\":30"));
        assert!(json.contains("\"state\":\"ONLINE\""));

        let parsed: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, device);
    }

    #[test]
    fn test_device_missing_optional_fields() {
        let parsed: Device = serde_json::from_str(r#"{"id":"bare"}"#).unwrap();
        assert_eq!(parsed.id, "bare");
        assert_eq!(parsed.api_level, 0);
        assert_eq!(parsed.state, DeviceState::Online);
    }

    #[test]
    fn test_support_type_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&SupportType::NotSupported).unwrap(),
            "\"NOT_SUPPORTED\""
        );
        assert_eq!(
            serde_json::from_str::<SupportType>("\"SUPPORTED\"").unwrap(),
            SupportType::Supported
        );
    }

    #[test]
    fn test_support_type_is_terminal() {
        assert!(SupportType::Supported.is_terminal());
        assert!(SupportType::NotSupported.is_terminal());
        assert!(!SupportType::Unknown.is_terminal());
    }

    #[test]
    fn test_reason_not_supported_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&ReasonNotSupported::DumpsysNotFound).unwrap(),
            "\"DUMPSYS_NOT_FOUND\""
        );
        assert_eq!(
            serde_json::from_str::<ReasonNotSupported>("\"GREP_NOT_FOUND\"").unwrap(),
            ReasonNotSupported::GrepNotFound
        );
    }

    #[test]
    fn test_foreground_process_serde() {
        let process = ForegroundProcess::new(4711, "com.example.app");
        let json = serde_json::to_string(&process).unwrap();
        assert!(json.contains("\"processName\":\"com.example.app\""));
    }
}

//! # foretrack-core - Core Domain Types
//!
//! Foundation crate for Foretrack. Provides domain types, error handling,
//! configuration, and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, toml, dirs, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Device`] - A device visible to the transport agent
//! - [`SupportType`] - Capability handshake outcome (Supported / NotSupported / Unknown)
//! - [`ReasonNotSupported`] - Why a device cannot report foreground processes
//! - [`ForegroundProcess`] - A process reported as foreground on a device
//! - [`ProcessEntry`] - A selectable process in a device's process list
//! - [`StreamId`] - Identifier for one device connection epoch
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ### Configuration (`config`)
//! - [`Settings`] - Application settings loaded from config.toml
//! - [`load_settings()`] / [`save_settings()`] - Settings IO with default fallback
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use foretrack_core::prelude::*;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all Foretrack crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use config::{
    default_config_path, load_settings, load_settings_required, save_settings, PollingSettings,
    Settings, TransportSettings,
};
pub use error::{Error, Result, ResultExt};
pub use types::{
    Device, DeviceState, ForegroundProcess, ProcessEntry, ReasonNotSupported, StreamId, SupportType,
};

//! Error types shared by the device plugin components.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for device plugin operations.
pub type PluginResult<T> = Result<T, Report<DevicePluginError>>;

/// Errors that can occur while registering, watching or serving.
#[derive(Debug, Display)]
pub enum DevicePluginError {
    /// Resource name or socket name is malformed
    #[display("Invalid resource identity: {message}")]
    InvalidIdentity { message: String },

    /// Dialing kubelet or the Register round-trip failed
    #[display("Failed to register with kubelet at {socket}")]
    Registration { socket: String },

    /// The plugin directory could not be watched
    #[display("Failed to watch plugin directory {dir}")]
    Watch { dir: String },

    /// The plugin socket could not be bound or the server loop failed
    #[display("Failed to serve device plugin on {socket}")]
    Serve { socket: String },

    /// The inventory provider could not produce a snapshot
    #[display("Failed to read device inventory: {message}")]
    Inventory { message: String },
}

impl Error for DevicePluginError {}

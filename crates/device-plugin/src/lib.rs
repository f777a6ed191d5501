//! Kubernetes device plugin advertising an extended resource to kubelet.
//!
//! The process registers with kubelet over its registration socket, serves
//! the `v1beta1` DevicePlugin API on its own socket in the shared plugin
//! directory, and exits when kubelet removes its socket so that a supervisor
//! can start a fresh instance that registers again.

pub mod allocation;
pub mod app;
pub mod config;
pub mod device;
pub mod error;
pub mod inventory;
pub mod registration;
pub mod service;
pub mod socket_watcher;

pub use app::Application;
pub use app::ShutdownReason;
pub use device::Device;
pub use device::DeviceHealth;
pub use device::DeviceInventorySnapshot;
pub use device::ResourceIdentity;
pub use error::DevicePluginError;
pub use inventory::InventoryProvider;

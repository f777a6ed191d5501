//! Resource identity and device inventory types.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::Path;

use device_plugin_pb::api;
use error_stack::bail;
use serde::Deserialize;

use crate::error::DevicePluginError;
use crate::error::PluginResult;

/// Identifies the resource this plugin serves. Fixed at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    resource_name: String,
    version: String,
    socket_name: String,
}

impl ResourceIdentity {
    /// Builds an identity for the `v1beta1` protocol.
    ///
    /// `resource_name` must look like `vendor-domain/resource` and
    /// `socket_name` must be a bare file name inside the plugin directory.
    pub fn new(
        resource_name: impl Into<String>,
        socket_name: impl Into<String>,
    ) -> PluginResult<Self> {
        let resource_name = resource_name.into();
        let socket_name = socket_name.into();

        match resource_name.split_once('/') {
            Some((vendor, resource))
                if !vendor.is_empty() && !resource.is_empty() && !resource.contains('/') => {}
            _ => bail!(DevicePluginError::InvalidIdentity {
                message: format!("resource name `{resource_name}` is not `vendor/resource`"),
            }),
        }

        let is_bare_file_name = !socket_name.is_empty()
            && socket_name != "."
            && socket_name != ".."
            && Path::new(&socket_name).file_name() == Some(OsStr::new(&socket_name));
        if !is_bare_file_name {
            bail!(DevicePluginError::InvalidIdentity {
                message: format!("socket name `{socket_name}` is not a bare file name"),
            });
        }

        Ok(Self {
            resource_name,
            version: device_plugin_pb::VERSION.to_string(),
            socket_name,
        })
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// File name of the plugin socket, relative to the plugin directory.
    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }
}

/// Scheduling eligibility of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum DeviceHealth {
    Healthy,
    Unhealthy,
}

impl DeviceHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceHealth::Healthy => device_plugin_pb::HEALTHY,
            DeviceHealth::Unhealthy => device_plugin_pb::UNHEALTHY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Device {
    pub id: String,
    pub health: DeviceHealth,
}

impl Device {
    pub fn new(id: impl Into<String>, health: DeviceHealth) -> Self {
        Self {
            id: id.into(),
            health,
        }
    }
}

impl From<&Device> for api::Device {
    fn from(device: &Device) -> Self {
        api::Device {
            id: device.id.clone(),
            health: device.health.as_str().to_string(),
            topology: None,
        }
    }
}

/// Devices of one resource as seen at a single instant, in provider order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInventorySnapshot {
    devices: Vec<Device>,
}

impl DeviceInventorySnapshot {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    /// Builds a snapshot from untrusted input, rejecting empty and duplicate
    /// device IDs.
    pub fn try_new(devices: Vec<Device>) -> PluginResult<Self> {
        let mut seen = HashSet::with_capacity(devices.len());
        for device in &devices {
            if device.id.is_empty() {
                bail!(DevicePluginError::Inventory {
                    message: "device ID must not be empty".to_string(),
                });
            }
            if !seen.insert(device.id.as_str()) {
                bail!(DevicePluginError::Inventory {
                    message: format!("duplicate device ID `{}`", device.id),
                });
            }
        }
        Ok(Self { devices })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub(crate) fn devices_mut(&mut self) -> &mut Vec<Device> {
        &mut self.devices
    }
}

impl From<&DeviceInventorySnapshot> for api::ListAndWatchResponse {
    fn from(snapshot: &DeviceInventorySnapshot) -> Self {
        api::ListAndWatchResponse {
            devices: snapshot.devices.iter().map(api::Device::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn identity_accepts_vendor_resource() {
        let identity =
            ResourceIdentity::new("hardware-vendor.example/foo", "sample-device-plugin.sock")
                .expect("identity should be valid");

        assert_eq!(identity.resource_name(), "hardware-vendor.example/foo");
        assert_eq!(identity.socket_name(), "sample-device-plugin.sock");
        assert_eq!(identity.version(), "v1beta1");
    }

    #[test]
    fn identity_rejects_malformed_resource_name() {
        for name in ["foo", "/foo", "vendor/", "a/b/c", ""] {
            assert!(
                ResourceIdentity::new(name, "plugin.sock").is_err(),
                "`{name}` should be rejected"
            );
        }
    }

    #[test]
    fn identity_rejects_socket_paths() {
        for socket in ["", "dir/plugin.sock", "/var/lib/plugin.sock", "..", "."] {
            assert!(
                ResourceIdentity::new("vendor.example/foo", socket).is_err(),
                "`{socket}` should be rejected"
            );
        }
    }

    #[test]
    fn snapshot_converts_to_wire_devices() {
        let snapshot = DeviceInventorySnapshot::new(vec![
            Device::new("a", DeviceHealth::Healthy),
            Device::new("b", DeviceHealth::Unhealthy),
        ]);

        let response = api::ListAndWatchResponse::from(&snapshot);
        let wire: Vec<(&str, &str)> = response
            .devices
            .iter()
            .map(|d| (d.id.as_str(), d.health.as_str()))
            .collect();

        assert_eq!(wire, vec![("a", "Healthy"), ("b", "Unhealthy")]);
    }

    #[test]
    fn checked_snapshot_rejects_empty_and_duplicate_ids() {
        let duplicate = DeviceInventorySnapshot::try_new(vec![
            Device::new("a", DeviceHealth::Healthy),
            Device::new("a", DeviceHealth::Unhealthy),
        ])
        .expect_err("duplicate IDs should be rejected");
        assert!(matches!(
            duplicate.current_context(),
            DevicePluginError::Inventory { .. }
        ));

        let empty =
            DeviceInventorySnapshot::try_new(vec![Device::new("", DeviceHealth::Healthy)])
                .expect_err("empty IDs should be rejected");
        assert!(matches!(
            empty.current_context(),
            DevicePluginError::Inventory { .. }
        ));

        let valid = DeviceInventorySnapshot::try_new(vec![
            Device::new("a", DeviceHealth::Healthy),
            Device::new("b", DeviceHealth::Unhealthy),
        ])
        .expect("distinct IDs are valid");
        assert_eq!(valid.devices().len(), 2);
    }
}

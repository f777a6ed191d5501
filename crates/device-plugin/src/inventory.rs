//! Device inventory providers.
//!
//! The plugin never discovers hardware itself. An [`InventoryProvider`] hands
//! out point-in-time [`DeviceInventorySnapshot`]s which the ListAndWatch
//! streams resample on every tick. Reads never mutate provider state, so a
//! provider can be shared by any number of concurrent streams.

use std::fmt::Debug;
use std::fs;
use std::path::PathBuf;

use error_stack::ResultExt;
use tokio::sync::watch;

use crate::device::Device;
use crate::device::DeviceHealth;
use crate::device::DeviceInventorySnapshot;
use crate::error::DevicePluginError;
use crate::error::PluginResult;

/// Source of the devices advertised to kubelet.
pub trait InventoryProvider: Debug + Send + Sync + 'static {
    /// Returns the devices as they are right now.
    fn current_snapshot(&self) -> PluginResult<DeviceInventorySnapshot>;

    /// Change notifications, for providers that know when their inventory
    /// changes. Streams fall back to polling when this returns `None`.
    fn subscribe(&self) -> Option<watch::Receiver<DeviceInventorySnapshot>> {
        None
    }
}

/// The three sample devices served when no inventory is configured.
pub fn sample_devices() -> Vec<Device> {
    vec![
        Device::new("imma_id_1", DeviceHealth::Healthy),
        Device::new("imma_id_2", DeviceHealth::Unhealthy),
        Device::new("imma_id_3", DeviceHealth::Healthy),
    ]
}

/// Fixed device list.
#[derive(Debug, Clone)]
pub struct StaticInventory {
    snapshot: DeviceInventorySnapshot,
}

impl StaticInventory {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            snapshot: DeviceInventorySnapshot::new(devices),
        }
    }
}

impl Default for StaticInventory {
    fn default() -> Self {
        Self::new(sample_devices())
    }
}

impl InventoryProvider for StaticInventory {
    fn current_snapshot(&self) -> PluginResult<DeviceInventorySnapshot> {
        Ok(self.snapshot.clone())
    }
}

/// Device list read from a YAML file on every snapshot.
///
/// ```yaml
/// - id: imma_id_1
///   health: Healthy
/// - id: imma_id_2
///   health: Unhealthy
/// ```
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InventoryProvider for FileInventory {
    fn current_snapshot(&self) -> PluginResult<DeviceInventorySnapshot> {
        let content = fs::read_to_string(&self.path).change_context_lazy(|| {
            DevicePluginError::Inventory {
                message: format!("cannot read {}", self.path.display()),
            }
        })?;
        let devices: Vec<Device> = serde_yaml::from_str(&content).change_context_lazy(|| {
            DevicePluginError::Inventory {
                message: format!("cannot parse {}", self.path.display()),
            }
        })?;
        DeviceInventorySnapshot::try_new(devices)
            .attach_printable_lazy(|| format!("invalid inventory in {}", self.path.display()))
    }
}

/// In-memory inventory whose owner pushes health changes.
///
/// Every update is published to subscribers, so open ListAndWatch streams
/// report it without waiting for the next polling tick.
#[derive(Debug)]
pub struct WatchInventory {
    tx: watch::Sender<DeviceInventorySnapshot>,
}

impl WatchInventory {
    pub fn new(devices: Vec<Device>) -> Self {
        let (tx, _rx) = watch::channel(DeviceInventorySnapshot::new(devices));
        Self { tx }
    }

    /// Sets the health of device `id`. Returns `false` if no such device exists.
    pub fn set_health(&self, id: &str, health: DeviceHealth) -> bool {
        let mut found = false;
        self.tx.send_if_modified(|snapshot| {
            let Some(device) = snapshot.devices_mut().iter_mut().find(|d| d.id == id) else {
                return false;
            };
            found = true;
            if device.health == health {
                return false;
            }
            device.health = health;
            true
        });
        found
    }

    /// Replaces the whole device list.
    pub fn replace(&self, devices: Vec<Device>) {
        self.tx.send_replace(DeviceInventorySnapshot::new(devices));
    }
}

impl InventoryProvider for WatchInventory {
    fn current_snapshot(&self) -> PluginResult<DeviceInventorySnapshot> {
        Ok(self.tx.borrow().clone())
    }

    fn subscribe(&self) -> Option<watch::Receiver<DeviceInventorySnapshot>> {
        Some(self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn static_inventory_returns_sample_devices() {
        let inventory = StaticInventory::default();
        let snapshot = inventory.current_snapshot().expect("static snapshot");

        assert_eq!(snapshot.devices().to_vec(), sample_devices());
    }

    #[test]
    fn file_inventory_is_reread_on_every_snapshot() {
        let mut file = NamedTempFile::new().expect("should create temp file");
        writeln!(file, "- id: gpu-0\n  health: Healthy").expect("should write");
        file.flush().expect("should flush");

        let inventory = FileInventory::new(file.path());
        let first = inventory.current_snapshot().expect("first snapshot");
        assert_eq!(
            first.devices().to_vec(),
            vec![Device::new("gpu-0", DeviceHealth::Healthy)]
        );

        fs::write(
            file.path(),
            "- id: gpu-0\n  health: Unhealthy\n- id: gpu-1\n  health: Healthy\n",
        )
        .expect("should rewrite");
        let second = inventory.current_snapshot().expect("second snapshot");
        assert_eq!(
            second.devices().to_vec(),
            vec![
                Device::new("gpu-0", DeviceHealth::Unhealthy),
                Device::new("gpu-1", DeviceHealth::Healthy),
            ]
        );
    }

    #[test]
    fn file_inventory_reports_missing_and_malformed_files() {
        let missing = FileInventory::new("/nonexistent/inventory.yaml");
        assert!(missing.current_snapshot().is_err());

        let mut file = NamedTempFile::new().expect("should create temp file");
        writeln!(file, "- id: gpu-0\n  health: Sparkly").expect("should write");
        let malformed = FileInventory::new(file.path());
        assert!(malformed.current_snapshot().is_err());
    }

    #[test]
    fn file_inventory_rejects_duplicate_and_empty_ids() {
        let mut file = NamedTempFile::new().expect("should create temp file");
        writeln!(
            file,
            "- id: a\n  health: Healthy\n- id: a\n  health: Unhealthy"
        )
        .expect("should write");
        let inventory = FileInventory::new(file.path());
        let report = inventory
            .current_snapshot()
            .expect_err("duplicate IDs should be rejected");
        assert!(matches!(
            report.current_context(),
            DevicePluginError::Inventory { .. }
        ));

        fs::write(file.path(), "- id: ''\n  health: Healthy\n").expect("should rewrite");
        let report = inventory
            .current_snapshot()
            .expect_err("empty IDs should be rejected");
        assert!(matches!(
            report.current_context(),
            DevicePluginError::Inventory { .. }
        ));
    }

    #[tokio::test]
    async fn watch_inventory_notifies_subscribers() {
        let inventory = WatchInventory::new(sample_devices());
        let mut rx = inventory.subscribe().expect("watch inventory subscribes");

        assert!(inventory.set_health("imma_id_2", DeviceHealth::Healthy));
        rx.changed().await.expect("sender alive");

        let snapshot = inventory.current_snapshot().expect("snapshot");
        assert!(snapshot
            .devices()
            .iter()
            .all(|d| d.health == DeviceHealth::Healthy));
    }

    #[test]
    fn watch_inventory_ignores_unknown_and_unchanged_devices() {
        let inventory = WatchInventory::new(sample_devices());
        let rx = inventory.subscribe().expect("watch inventory subscribes");

        assert!(!inventory.set_health("missing", DeviceHealth::Healthy));
        assert!(inventory.set_health("imma_id_1", DeviceHealth::Healthy));
        assert!(!rx.has_changed().expect("sender alive"));

        inventory.replace(vec![]);
        assert!(rx.has_changed().expect("sender alive"));
        assert!(inventory
            .current_snapshot()
            .expect("snapshot")
            .devices()
            .is_empty());
    }
}

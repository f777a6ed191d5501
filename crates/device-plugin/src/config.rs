use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use device_plugin_pb::api::DevicePluginOptions;
use utils::version;

use crate::allocation::DEFAULT_ENV_KEY;
use crate::device::ResourceIdentity;
use crate::error::PluginResult;
use crate::inventory::FileInventory;
use crate::inventory::InventoryProvider;
use crate::inventory::StaticInventory;

pub const DEFAULT_DEVICE_PLUGIN_DIR: &str = "/var/lib/kubelet/device-plugins";
pub const DEFAULT_KUBELET_SOCKET_NAME: &str = "kubelet.sock";
pub const DEFAULT_SOCKET_NAME: &str = "sample-device-plugin.sock";
pub const DEFAULT_RESOURCE_NAME: &str = "hardware-vendor.example/foo";

#[derive(Parser, Debug)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        env = "DEVICE_PLUGIN_DIR",
        value_hint = clap::ValueHint::DirPath,
        default_value = DEFAULT_DEVICE_PLUGIN_DIR,
        help = "Directory shared with kubelet holding kubelet's and this plugin's sockets"
    )]
    pub device_plugin_dir: PathBuf,

    #[arg(
        long,
        env = "KUBELET_SOCKET_NAME",
        default_value = DEFAULT_KUBELET_SOCKET_NAME,
        help = "File name of kubelet's registration socket inside the plugin directory"
    )]
    pub kubelet_socket_name: String,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_SOCKET_NAME",
        default_value = DEFAULT_SOCKET_NAME,
        help = "File name of this plugin's socket inside the plugin directory"
    )]
    pub socket_name: String,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_RESOURCE_NAME",
        default_value = DEFAULT_RESOURCE_NAME,
        help = "Extended resource name advertised to kubelet, e.g. vendor.example/foo"
    )]
    pub resource_name: String,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_ENV_KEY",
        default_value = DEFAULT_ENV_KEY,
        help = "Environment variable receiving the allocated device IDs"
    )]
    pub env_key: String,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_POLL_INTERVAL_MS",
        default_value = "1000",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Interval between two device list updates sent to kubelet, in milliseconds"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_REGISTRATION_TIMEOUT_SECS",
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Upper bound for dialing kubelet and completing registration, in seconds"
    )]
    pub registration_timeout_secs: u64,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_INVENTORY_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML device list re-read on every update; the built-in sample devices are served when unset"
    )]
    pub inventory_file: Option<PathBuf>,

    #[arg(
        long,
        help = "Ask kubelet to call PreStartContainer before each container start",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub pre_start_required: bool,

    #[arg(
        long,
        help = "Advertise GetPreferredAllocation to kubelet",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub get_preferred_allocation_available: bool,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to a daily rolling file with this path prefix"
    )]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Validates the arguments into the settings the application runs with.
    pub fn settings(&self) -> PluginResult<PluginSettings> {
        let identity = ResourceIdentity::new(&self.resource_name, &self.socket_name)?;
        Ok(PluginSettings {
            plugin_dir: self.device_plugin_dir.clone(),
            kubelet_socket_name: self.kubelet_socket_name.clone(),
            identity,
            env_key: self.env_key.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            registration_timeout: Duration::from_secs(self.registration_timeout_secs),
            options: DevicePluginOptions {
                pre_start_required: self.pre_start_required,
                get_preferred_allocation_available: self.get_preferred_allocation_available,
            },
        })
    }

    pub fn inventory(&self) -> Arc<dyn InventoryProvider> {
        match &self.inventory_file {
            Some(path) => Arc::new(FileInventory::new(path)),
            None => Arc::new(StaticInventory::default()),
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    pub plugin_dir: PathBuf,
    pub kubelet_socket_name: String,
    pub identity: ResourceIdentity,
    pub env_key: String,
    pub poll_interval: Duration,
    pub registration_timeout: Duration,
    pub options: DevicePluginOptions,
}

impl PluginSettings {
    /// Settings with the protocol defaults, rooted at `plugin_dir`.
    pub fn new(plugin_dir: impl Into<PathBuf>, identity: ResourceIdentity) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            kubelet_socket_name: DEFAULT_KUBELET_SOCKET_NAME.to_string(),
            identity,
            env_key: DEFAULT_ENV_KEY.to_string(),
            poll_interval: Duration::from_secs(1),
            registration_timeout: Duration::from_secs(10),
            options: DevicePluginOptions::default(),
        }
    }

    pub fn kubelet_socket(&self) -> PathBuf {
        self.plugin_dir.join(&self.kubelet_socket_name)
    }

    pub fn plugin_socket(&self) -> PathBuf {
        self.plugin_dir.join(self.identity.socket_name())
    }
}

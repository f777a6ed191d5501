//! Process orchestration.
//!
//! Startup is strictly ordered: subscribe to the plugin directory, register
//! with kubelet, start the socket monitor, then serve. The subscription comes
//! first so a kubelet restart during registration is not missed. Components never exit the process
//! themselves; they send a [`ShutdownReason`] on the application's shutdown
//! channel and [`Application::run`] returns it to `main`.

use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use error_stack::Report;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::config::PluginSettings;
use crate::error::DevicePluginError;
use crate::error::PluginResult;
use crate::inventory::InventoryProvider;
use crate::registration;
use crate::service::ResourcePlugin;
use crate::socket_watcher::KubeletSocketWatcher;

/// Why the application stopped without an error.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// kubelet removed its socket; a fresh process must re-register
    #[display("kubelet socket removed")]
    KubeletRestarted,
    /// the process received SIGTERM or SIGINT
    #[display("termination signal received")]
    Signal,
}

impl ShutdownReason {
    /// Process exit status. Only a detected kubelet restart is a clean exit.
    pub fn exit_code(self) -> u8 {
        match self {
            ShutdownReason::KubeletRestarted => 0,
            ShutdownReason::Signal => 1,
        }
    }
}

pub struct Application {
    settings: PluginSettings,
    plugin: Arc<ResourcePlugin>,
    watcher: KubeletSocketWatcher,
    shutdown_tx: mpsc::Sender<ShutdownReason>,
    shutdown_rx: mpsc::Receiver<ShutdownReason>,
}

impl Application {
    pub fn new(settings: PluginSettings, inventory: Arc<dyn InventoryProvider>) -> Self {
        let plugin = ResourcePlugin::new(
            settings.identity.clone(),
            settings.options,
            settings.env_key.clone(),
            settings.poll_interval,
            inventory,
        );
        let watcher =
            KubeletSocketWatcher::new(settings.plugin_dir.clone(), &settings.kubelet_socket_name);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            settings,
            plugin,
            watcher,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Sender for requesting a shutdown from outside the application, e.g.
    /// from a signal handler.
    pub fn shutdown_sender(&self) -> mpsc::Sender<ShutdownReason> {
        self.shutdown_tx.clone()
    }

    /// Registers, watches and serves until a shutdown is requested.
    ///
    /// Returns the shutdown reason on a deliberate stop; any startup or serve
    /// failure is returned as an error.
    pub async fn run(self) -> PluginResult<ShutdownReason> {
        let Self {
            settings,
            plugin,
            watcher,
            shutdown_tx,
            mut shutdown_rx,
        } = self;

        info!(
            resource = settings.identity.resource_name(),
            plugin_dir = %settings.plugin_dir.display(),
            "starting device plugin"
        );

        let subscription = watcher.subscribe()?;
        registration::register_with_kubelet(
            &settings.kubelet_socket(),
            plugin.identity(),
            plugin.options(),
            settings.registration_timeout,
        )
        .await?;

        let cancellation_token = CancellationToken::new();
        let monitor = {
            let token = cancellation_token.child_token();
            let shutdown_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                info!("starting kubelet socket watcher task");
                watcher.run(subscription, shutdown_tx, token).await;
                info!("kubelet socket watcher task completed");
            })
        };

        let result = serve_until_shutdown(
            &plugin,
            &settings,
            &mut shutdown_rx,
            cancellation_token.clone(),
        )
        .await;

        cancellation_token.cancel();
        if tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .is_err()
        {
            warn!("kubelet socket watcher did not stop in time");
        }
        result
    }
}

async fn serve_until_shutdown(
    plugin: &Arc<ResourcePlugin>,
    settings: &PluginSettings,
    shutdown_rx: &mut mpsc::Receiver<ShutdownReason>,
    cancellation_token: CancellationToken,
) -> PluginResult<ShutdownReason> {
    let listener = plugin.bind(&settings.plugin_dir)?;

    tokio::select! {
        served = plugin.serve(listener, cancellation_token) => {
            served?;
            Err(Report::new(DevicePluginError::Serve {
                socket: settings.plugin_socket().display().to_string(),
            })
            .attach_printable("device plugin server stopped unexpectedly"))
        }
        Some(reason) = shutdown_rx.recv() => {
            info!("shutdown requested: {reason}");
            Ok(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn only_kubelet_restart_exits_cleanly() {
        assert_eq!(ShutdownReason::KubeletRestarted.exit_code(), 0);
        assert_eq!(ShutdownReason::Signal.exit_code(), 1);
    }
}

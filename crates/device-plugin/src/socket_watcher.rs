//! Kubelet restart detection.
//!
//! Kubelet deletes its own socket in the device plugin directory when it
//! stops, and forgets every registration when it starts again. The watcher
//! turns the removal of that socket into a [`ShutdownReason::KubeletRestarted`]
//! request so the process can exit and be relaunched into a fresh
//! registration.

use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;

use error_stack::bail;
use error_stack::ResultExt;
use notify::event::EventKind;
use notify::Config;
use notify::Event;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::app::ShutdownReason;
use crate::error::DevicePluginError;
use crate::error::PluginResult;

/// Watches the plugin directory for removal of one socket file.
#[derive(Debug, Clone)]
pub struct KubeletSocketWatcher {
    plugin_dir: PathBuf,
    kubelet_socket_name: OsString,
}

/// Live filesystem subscription produced by [`KubeletSocketWatcher::subscribe`].
///
/// Dropping it stops the underlying watcher and closes the event channel.
pub struct SocketEvents {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl KubeletSocketWatcher {
    pub fn new(plugin_dir: impl Into<PathBuf>, kubelet_socket_name: impl Into<OsString>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            kubelet_socket_name: kubelet_socket_name.into(),
        }
    }

    /// Starts watching the direct children of the plugin directory.
    ///
    /// The directory must already exist.
    pub fn subscribe(&self) -> PluginResult<SocketEvents> {
        let error = || DevicePluginError::Watch {
            dir: self.plugin_dir.display().to_string(),
        };

        if !self.plugin_dir.is_dir() {
            bail!(error());
        }

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // the receiver is gone once the watch loop has stopped
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .change_context_lazy(error)
        .attach_printable("failed to create filesystem watcher")?;

        watcher
            .watch(&self.plugin_dir, RecursiveMode::NonRecursive)
            .change_context_lazy(error)?;

        info!(
            "watching {} for removal of {:?}",
            self.plugin_dir.display(),
            self.kubelet_socket_name
        );
        Ok(SocketEvents {
            _watcher: watcher,
            events,
        })
    }

    /// Runs the watch loop until the kubelet socket is removed, the
    /// subscription closes, or `cancellation_token` fires.
    ///
    /// On removal a single [`ShutdownReason::KubeletRestarted`] is sent on
    /// `shutdown`.
    pub async fn run(
        &self,
        mut subscription: SocketEvents,
        shutdown: mpsc::Sender<ShutdownReason>,
        cancellation_token: CancellationToken,
    ) {
        loop {
            let res = tokio::select! {
                _ = cancellation_token.cancelled() => {
                    debug!("kubelet socket watcher cancelled");
                    return;
                }
                res = subscription.events.recv() => res,
            };

            match res {
                Some(Ok(event)) => {
                    if self.is_kubelet_socket_removal(&event) {
                        info!("kubelet socket has been removed, requesting restart");
                        if shutdown.send(ShutdownReason::KubeletRestarted).await.is_err() {
                            warn!("shutdown channel closed before restart request was delivered");
                        }
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!("filesystem watch error: {e}");
                }
                None => {
                    info!("filesystem watcher closed");
                    return;
                }
            }
        }
    }

    fn is_kubelet_socket_removal(&self, event: &Event) -> bool {
        if !matches!(event.kind, EventKind::Remove(_)) {
            return false;
        }
        event
            .paths
            .iter()
            .any(|path| self.is_kubelet_socket(path))
    }

    /// notify reports absolute paths even for a relative watch root, and the
    /// watch is non-recursive, so the file name alone identifies the socket.
    fn is_kubelet_socket(&self, path: &Path) -> bool {
        path.file_name() == Some(self.kubelet_socket_name.as_os_str())
    }
}

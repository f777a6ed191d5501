//! The DevicePlugin gRPC service kubelet connects back to.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use device_plugin_pb::api::device_plugin_server::DevicePlugin;
use device_plugin_pb::api::device_plugin_server::DevicePluginServer;
use device_plugin_pb::api::AllocateRequest;
use device_plugin_pb::api::AllocateResponse;
use device_plugin_pb::api::DevicePluginOptions;
use device_plugin_pb::api::Empty;
use device_plugin_pb::api::ListAndWatchResponse;
use device_plugin_pb::api::PreStartContainerRequest;
use device_plugin_pb::api::PreStartContainerResponse;
use device_plugin_pb::api::PreferredAllocationRequest;
use device_plugin_pb::api::PreferredAllocationResponse;
use error_stack::ResultExt;
use futures::Stream;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::allocation;
use crate::device::DeviceInventorySnapshot;
use crate::device::ResourceIdentity;
use crate::error::DevicePluginError;
use crate::error::PluginResult;
use crate::inventory::InventoryProvider;

/// Device plugin serving one resource from an inventory provider.
#[derive(Debug)]
pub struct ResourcePlugin {
    identity: ResourceIdentity,
    options: DevicePluginOptions,
    /// environment variable the allocated IDs are exposed under
    env_key: String,
    /// upper bound between two ListAndWatch updates
    poll_interval: Duration,
    inventory: Arc<dyn InventoryProvider>,
}

impl ResourcePlugin {
    pub fn new(
        identity: ResourceIdentity,
        options: DevicePluginOptions,
        env_key: impl Into<String>,
        poll_interval: Duration,
        inventory: Arc<dyn InventoryProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            options,
            env_key: env_key.into(),
            poll_interval,
            inventory,
        })
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    pub fn options(&self) -> DevicePluginOptions {
        self.options
    }

    /// Binds the plugin socket inside `plugin_dir`, replacing a stale socket
    /// left behind by an unclean shutdown.
    pub fn bind(&self, plugin_dir: &Path) -> PluginResult<UnixListener> {
        let socket_path = plugin_dir.join(self.identity.socket_name());
        let error = || DevicePluginError::Serve {
            socket: socket_path.display().to_string(),
        };

        match std::fs::remove_file(&socket_path) {
            Ok(()) => debug!("removed stale socket {}", socket_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .change_context_lazy(error)
                    .attach_printable("failed to remove stale socket");
            }
        }

        let listener = UnixListener::bind(&socket_path).change_context_lazy(error)?;
        info!("device plugin is bound to: {}", socket_path.display());
        Ok(listener)
    }

    /// Serves the DevicePlugin API on `listener` until `cancellation_token`
    /// fires. Open ListAndWatch streams end with the token.
    pub async fn serve(
        self: &Arc<Self>,
        listener: UnixListener,
        cancellation_token: CancellationToken,
    ) -> PluginResult<()> {
        let socket = listener
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_default();

        let server = DevicePluginServer::new(DevicePluginService::new(
            self.clone(),
            cancellation_token.clone(),
        ));

        tonic::transport::Server::builder()
            .add_service(server)
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
                cancellation_token.cancelled().await;
                info!("shutting down device plugin server");
            })
            .await
            .change_context(DevicePluginError::Serve { socket })
    }
}

/// DevicePlugin service implementation
#[derive(Debug, Clone)]
pub struct DevicePluginService {
    plugin: Arc<ResourcePlugin>,
    cancellation_token: CancellationToken,
}

impl DevicePluginService {
    pub fn new(plugin: Arc<ResourcePlugin>, cancellation_token: CancellationToken) -> Self {
        Self {
            plugin,
            cancellation_token,
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    /// get device plugin options
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");

        Ok(Response::new(self.plugin.options))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    /// list and watch device state changes
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!(
            resource = self.plugin.identity.resource_name(),
            "starting to watch device list"
        );

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(stream_inventory(
            self.plugin.inventory.clone(),
            self.plugin.poll_interval,
            tx,
            self.cancellation_token.clone(),
        ));

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    /// get preferred device allocation
    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        let req = request.into_inner();
        debug!("getting preferred device allocation: {:?}", req);

        Ok(Response::new(PreferredAllocationResponse {
            container_responses: allocation::preferred_allocation(&req.container_requests),
        }))
    }

    /// allocate devices to container
    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();
        info!("allocating devices to containers: {:?}", req);

        let container_responses = allocation::allocate(&self.plugin.env_key, &req.container_requests);

        Ok(Response::new(AllocateResponse {
            container_responses,
        }))
    }

    /// pre-start container
    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        let req = request.into_inner();
        debug!("pre-start container for devices: {:?}", req.devices_ids);

        Ok(Response::new(PreStartContainerResponse {}))
    }
}

/// Feeds one ListAndWatch stream.
///
/// Sends a snapshot right away, then on every tick of `poll_interval` and on
/// every change the provider publishes. Returns once the receiving side is
/// gone or the server shuts down.
async fn stream_inventory(
    inventory: Arc<dyn InventoryProvider>,
    poll_interval: Duration,
    tx: mpsc::Sender<Result<ListAndWatchResponse, Status>>,
    cancellation_token: CancellationToken,
) {
    let mut changes = inventory.subscribe();
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                debug!("device watch task stopped");
                return;
            }
            // the first tick completes immediately
            _ = ticker.tick() => {}
            changed = next_change(&mut changes) => {
                if !changed {
                    changes = None;
                    continue;
                }
                // keep the polling cadence relative to the last send
                ticker.reset();
            }
        }

        let snapshot = match inventory.current_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("skipping device list update: {e:?}");
                continue;
            }
        };

        if tx.send(Ok(response(&snapshot))).await.is_err() {
            info!("ListAndWatch client disconnected");
            return;
        }
    }
}

/// Resolves when the provider publishes a change; `false` once it never will.
async fn next_change(changes: &mut Option<watch::Receiver<DeviceInventorySnapshot>>) -> bool {
    match changes {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

fn response(snapshot: &DeviceInventorySnapshot) -> ListAndWatchResponse {
    let response = ListAndWatchResponse::from(snapshot);
    debug!("sending {} devices", response.devices.len());
    response
}

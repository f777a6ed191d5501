//! One-shot registration handshake with kubelet.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use device_plugin_pb::api::registration_client::RegistrationClient;
use device_plugin_pb::api::DevicePluginOptions;
use device_plugin_pb::api::RegisterRequest;
use error_stack::Report;
use error_stack::ResultExt;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tonic::Request;
use tower::service_fn;
use tracing::info;

use crate::device::ResourceIdentity;
use crate::error::DevicePluginError;
use crate::error::PluginResult;

/// Registers the plugin with the kubelet listening on `kubelet_socket`.
///
/// Both the dial and the Register round-trip must finish within `timeout`.
/// There is no retry: a failed registration is fatal to startup.
#[tracing::instrument(skip(identity, options), fields(resource = identity.resource_name()))]
pub async fn register_with_kubelet(
    kubelet_socket: &Path,
    identity: &ResourceIdentity,
    options: DevicePluginOptions,
    timeout: Duration,
) -> PluginResult<()> {
    info!("registering device plugin with kubelet: {}", kubelet_socket.display());
    let error = || DevicePluginError::Registration {
        socket: kubelet_socket.display().to_string(),
    };

    let request = RegisterRequest {
        version: identity.version().to_string(),
        endpoint: identity.socket_name().to_string(),
        resource_name: identity.resource_name().to_string(),
        options: Some(options),
    };

    let handshake = async {
        let channel = create_uds_channel(kubelet_socket.to_path_buf(), timeout)
            .await
            .change_context_lazy(error)
            .attach_printable("failed to dial kubelet")?;
        let mut client = RegistrationClient::new(channel);
        client
            .register(Request::new(request))
            .await
            .map_err(|status| {
                Report::new(error()).attach_printable(format!(
                    "kubelet rejected registration: {}",
                    status.message()
                ))
            })
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(result) => {
            result?;
            info!("successfully registered device plugin with kubelet");
            Ok(())
        }
        Err(_) => Err(Report::new(error())
            .attach_printable(format!("registration timed out after {timeout:?}"))),
    }
}

/// create Unix Domain Socket client connection
async fn create_uds_channel(
    socket_path: PathBuf,
    connect_timeout: Duration,
) -> Result<Channel, tonic::transport::Error> {
    // The URI is a placeholder; the connector always dials the unix socket.
    Endpoint::from_static("http://[::]:50051")
        .connect_timeout(connect_timeout)
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move { UnixStream::connect(socket_path).await.map(TokioIo::new) }
        }))
        .await
}

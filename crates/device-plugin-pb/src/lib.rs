//! Generated bindings for the kubelet device plugin API (`v1beta1`).

#![allow(clippy::doc_markdown)]

/// Version string kubelet expects in `RegisterRequest::version`.
pub const VERSION: &str = "v1beta1";

/// Health value of a device that may be scheduled.
pub const HEALTHY: &str = "Healthy";

/// Health value of a device that must not be scheduled.
pub const UNHEALTHY: &str = "Unhealthy";

pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

//! Allocation decisions.
//!
//! Both functions are pure: the response for a container depends only on that
//! container's request. Requested IDs are not checked against the advertised
//! inventory; kubelet only hands out IDs it has seen as healthy.

use std::collections::HashMap;
use std::collections::HashSet;

use device_plugin_pb::api::ContainerAllocateRequest;
use device_plugin_pb::api::ContainerAllocateResponse;
use device_plugin_pb::api::ContainerPreferredAllocationRequest;
use device_plugin_pb::api::ContainerPreferredAllocationResponse;

/// Environment variable the allocated device IDs are exposed under by default.
pub const DEFAULT_ENV_KEY: &str = "foos";

/// Builds one response per container request, in request order.
///
/// Each response exposes the requested IDs, joined with `,`, under `env_key`.
pub fn allocate(
    env_key: &str,
    requests: &[ContainerAllocateRequest],
) -> Vec<ContainerAllocateResponse> {
    requests
        .iter()
        .map(|request| container_allocation(env_key, &request.devices_ids))
        .collect()
}

fn container_allocation(env_key: &str, device_ids: &[String]) -> ContainerAllocateResponse {
    let envs = HashMap::from([(env_key.to_string(), device_ids.join(","))]);
    ContainerAllocateResponse {
        envs,
        ..Default::default()
    }
}

/// Picks devices for each container: every must-include ID first, then
/// available IDs in the order kubelet offered them, up to `allocation_size`.
pub fn preferred_allocation(
    requests: &[ContainerPreferredAllocationRequest],
) -> Vec<ContainerPreferredAllocationResponse> {
    requests.iter().map(container_preference).collect()
}

fn container_preference(
    request: &ContainerPreferredAllocationRequest,
) -> ContainerPreferredAllocationResponse {
    let size = usize::try_from(request.allocation_size).unwrap_or(0);
    let mut seen = HashSet::new();
    let mut device_ids = Vec::new();

    // must-include IDs are kept even when they exceed the requested size
    for id in &request.must_include_device_ids {
        if seen.insert(id.as_str()) {
            device_ids.push(id.clone());
        }
    }
    for id in &request.available_device_ids {
        if device_ids.len() >= size {
            break;
        }
        if seen.insert(id.as_str()) {
            device_ids.push(id.clone());
        }
    }

    ContainerPreferredAllocationResponse { device_ids }
}

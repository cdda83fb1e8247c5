// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deterministic names for every northbound object the controller touches.
//!
//! These strings are matched by other components and by the database itself,
//! so every function here is pure and must stay bit-for-bit stable. Names are
//! collision-free because Kubernetes namespaces and Service names are DNS labels
//! (lowercase alphanumerics and `-`), which never contain the `/` and `_`
//! separators used below.

use crate::constants::{
    CLUSTER_LB_GROUP_NAME, CLUSTER_ROUTER_LB_GROUP_NAME, CLUSTER_SWITCH_LB_GROUP_NAME,
    GATEWAY_ROUTER_PREFIX, SERVICE_LB_PREFIX, TEMPLATE_REFERENCE_MARKER,
};
use crate::network::NetworkInfo;
use crate::types::{AddressFamily, Protocol, ServiceKey};
use std::fmt::Write;
use std::net::IpAddr;

/// The three per-network load balancer groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LbGroup {
    /// Attached to every node switch and every gateway router
    Cluster,
    /// Attached to every node switch
    Switch,
    /// Attached to every gateway router
    Router,
}

impl LbGroup {
    pub const ALL: [LbGroup; 3] = [LbGroup::Cluster, LbGroup::Switch, LbGroup::Router];

    /// Group name before network scoping.
    #[must_use]
    pub fn base_name(self) -> &'static str {
        match self {
            Self::Cluster => CLUSTER_LB_GROUP_NAME,
            Self::Switch => CLUSTER_SWITCH_LB_GROUP_NAME,
            Self::Router => CLUSTER_ROUTER_LB_GROUP_NAME,
        }
    }
}

/// Logical switch of a node on `network`.
#[must_use]
pub fn switch_name(network: &NetworkInfo, node: &str) -> String {
    network.scoped_name(node)
}

/// Gateway router of a node on `network`.
#[must_use]
pub fn gateway_router_name(network: &NetworkInfo, node: &str) -> String {
    network.scoped_name(&format!("{GATEWAY_ROUTER_PREFIX}{node}"))
}

/// Load balancer group name on `network`.
#[must_use]
pub fn lb_group_name(network: &NetworkInfo, group: LbGroup) -> String {
    network.scoped_name(group.base_name())
}

fn service_lb_base(network: &NetworkInfo, key: &ServiceKey, protocol: Protocol) -> String {
    network.scoped_name(&format!(
        "{SERVICE_LB_PREFIX}{}/{}_{}",
        key.namespace, key.name, protocol
    ))
}

/// `Service_<ns>/<name>_<PROTO>_cluster`
#[must_use]
pub fn cluster_lb_name(network: &NetworkInfo, key: &ServiceKey, protocol: Protocol) -> String {
    format!("{}_cluster", service_lb_base(network, key, protocol))
}

/// `Service_<ns>/<name>_<PROTO>_node_switch_template_<family>_merged`
#[must_use]
pub fn merged_template_lb_name(
    network: &NetworkInfo,
    key: &ServiceKey,
    protocol: Protocol,
    family: AddressFamily,
) -> String {
    format!(
        "{}_node_switch_template_{family}_merged",
        service_lb_base(network, key, protocol)
    )
}

/// `Service_<ns>/<name>_<PROTO>_node_switch_template_<family>`, used when
/// node-local traffic policy splits switch and router handling.
#[must_use]
pub fn switch_template_lb_name(
    network: &NetworkInfo,
    key: &ServiceKey,
    protocol: Protocol,
    family: AddressFamily,
) -> String {
    format!(
        "{}_node_switch_template_{family}",
        service_lb_base(network, key, protocol)
    )
}

/// `Service_<ns>/<name>_<PROTO>_node_router_template_<family>`
#[must_use]
pub fn router_template_lb_name(
    network: &NetworkInfo,
    key: &ServiceKey,
    protocol: Protocol,
    family: AddressFamily,
) -> String {
    format!(
        "{}_node_router_template_{family}",
        service_lb_base(network, key, protocol)
    )
}

/// Per-chassis node address variable, e.g. `NODEIP_IPv4_0`.
#[must_use]
pub fn node_template_var_name(family: AddressFamily, index: usize) -> String {
    format!("{}{index}", family.template_prefix())
}

/// Reference to a template variable (`^NODEIP_IPv4_0`).
#[must_use]
pub fn template_reference(variable: &str) -> String {
    format!("{TEMPLATE_REFERENCE_MARKER}{variable}")
}

/// Escape an arbitrary string into a template variable name.
///
/// ASCII alphanumerics are kept; every other byte becomes `_XX` with uppercase
/// hex. Escapes never produce two consecutive underscores, which leaves `__`
/// free for use as a field terminator.
#[must_use]
pub fn escape_template_name(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() {
            escaped.push(char::from(byte));
        } else {
            // Writing to a String cannot fail
            let _ = write!(escaped, "_{byte:02X}");
        }
    }
    escaped
}

/// Prefix shared by every node-local target variable of one Service.
///
/// Variables whose name starts with this prefix are owned by `key` on `network`
/// and no other Service can produce the same prefix.
#[must_use]
pub fn local_target_prefix(network: &NetworkInfo, key: &ServiceKey) -> String {
    format!(
        "{}__",
        escape_template_name(&network.scoped_name(&format!(
            "{SERVICE_LB_PREFIX}{}/{}",
            key.namespace, key.name
        )))
    )
}

/// Per-chassis variable holding one node's local endpoints for a Service port.
#[must_use]
pub fn local_target_var_name(
    network: &NetworkInfo,
    key: &ServiceKey,
    protocol: Protocol,
    port: u16,
    family: AddressFamily,
) -> String {
    format!(
        "{}{protocol}_{port}_node_router_{family}",
        local_target_prefix(network, key)
    )
}

/// `ip:port`, with IPv6 addresses bracketed and in canonical form.
#[must_use]
pub fn ip_port(ip: &IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

/// VIP key whose address is a template reference (`^NODEIP_IPv4_0:30123`).
#[must_use]
pub fn template_vip(variable: &str, port: u16) -> String {
    format!("{}:{port}", template_reference(variable))
}

/// Comma-joined `ip:port` endpoint list; empty when there are no endpoints.
#[must_use]
pub fn join_endpoints<'a>(endpoints: impl IntoIterator<Item = (&'a IpAddr, u16)>) -> String {
    endpoints
        .into_iter()
        .map(|(ip, port)| ip_port(ip, port))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
#[path = "naming_tests.rs"]
mod naming_tests;

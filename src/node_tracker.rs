// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-node network facts for the nodes of this zone.
//!
//! The node watcher turns every Node into a [`NodeInfo`] with
//! [`NodeInfo::from_node`] and feeds it to the [`NodeTopologyTracker`]. Every
//! Service sync takes a [`NodeTopologyTracker::snapshot`] first, so the builder
//! never observes a node set that is being modified.
//!
//! Any change to a tracked node, and any removal, asks for a full resync. There
//! is no separate node cleanup path: the next sync of every Service recomputes
//! template variables from the snapshot and prunes whatever is gone.

use crate::labels::{
    NODE_CHASSIS_ID_ANNOTATION, NODE_HOST_CIDRS_ANNOTATION, NODE_L3_GATEWAY_CONFIG_ANNOTATION,
    NODE_ZONE_NAME_ANNOTATION,
};
use crate::constants::DEFAULT_ZONE;
use crate::metrics;
use crate::naming::{gateway_router_name, switch_name};
use crate::network::NetworkInfo;
use crate::sync_errors::TopologyError;
use crate::types::{AddressFamily, ServiceKey};
use k8s_openapi::api::core::v1::Node;
use ipnetwork::{IpNetwork, IpNetworkError};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Network facts about one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub zone: String,
    pub chassis_id: String,
    pub switch_name: String,
    pub gateway_router_name: String,
    /// Addresses used for node port templating, in annotation order
    pub host_addresses: Vec<IpAddr>,
}

impl NodeInfo {
    /// Build a [`NodeInfo`] from the OVN annotations on a Node.
    ///
    /// # Arguments
    /// * `node` - The Kubernetes Node
    /// * `network` - Network whose switch and router names should be derived
    ///
    /// # Errors
    /// Returns [`TopologyError`] when the chassis annotation is missing or any
    /// OVN annotation is malformed. The node should be skipped, not retried.
    pub fn from_node(node: &Node, network: &NetworkInfo) -> Result<Self, TopologyError> {
        let name = node.name_any();
        let annotations = node.annotations();

        let chassis_id = annotations
            .get(NODE_CHASSIS_ID_ANNOTATION)
            .filter(|value| !value.is_empty())
            .cloned()
            .ok_or_else(|| TopologyError::MissingChassisId { node: name.clone() })?;

        let zone = annotations
            .get(NODE_ZONE_NAME_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| DEFAULT_ZONE.to_string());

        // host-cidrs first, then the gateway addresses, then InternalIP
        let mut host_addresses = match annotations.get(NODE_HOST_CIDRS_ANNOTATION) {
            Some(raw) => parse_host_cidrs(&name, raw)?,
            None => Vec::new(),
        };
        if host_addresses.is_empty() {
            if let Some(raw) = annotations.get(NODE_L3_GATEWAY_CONFIG_ANNOTATION) {
                host_addresses = parse_gateway_addresses(&name, raw)?;
            }
        }
        if host_addresses.is_empty() {
            host_addresses = internal_ips(node);
        }
        if host_addresses.is_empty() {
            warn!(node = %name, "Node has no host addresses; no node port templates will reference it");
        }

        Ok(Self {
            switch_name: switch_name(network, &name),
            gateway_router_name: gateway_router_name(network, &name),
            name,
            zone,
            chassis_id,
            host_addresses,
        })
    }

    /// Host addresses of one family, in order.
    pub fn host_addresses_of(&self, family: AddressFamily) -> impl Iterator<Item = &IpAddr> {
        self.host_addresses
            .iter()
            .filter(move |ip| AddressFamily::of(ip) == family)
    }
}

fn malformed(node: &str, annotation: &str, reason: impl ToString) -> TopologyError {
    TopologyError::MalformedAnnotation {
        node: node.to_string(),
        annotation: annotation.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse an `ip/len` or bare `ip` string, dropping the mask.
fn parse_cidr_address(node: &str, annotation: &str, cidr: &str) -> Result<IpAddr, TopologyError> {
    let invalid = |reason: String| malformed(node, annotation, format!("'{cidr}' is not an IP or CIDR: {reason}"));

    let network: IpNetwork = cidr.parse().map_err(|e: IpNetworkError| invalid(e.to_string()))?;
    if let Some((_, prefix)) = cidr.rsplit_once('/') {
        if prefix != network.prefix().to_string() {
            return Err(invalid(format!("prefix length must be written as /{}", network.prefix())));
        }
    }
    Ok(network.ip())
}

fn parse_host_cidrs(node: &str, raw: &str) -> Result<Vec<IpAddr>, TopologyError> {
    let cidrs: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| malformed(node, NODE_HOST_CIDRS_ANNOTATION, e))?;

    let mut addresses = Vec::with_capacity(cidrs.len());
    for cidr in &cidrs {
        let ip = parse_cidr_address(node, NODE_HOST_CIDRS_ANNOTATION, cidr)?;
        if !addresses.contains(&ip) {
            addresses.push(ip);
        }
    }
    Ok(addresses)
}

fn parse_gateway_addresses(node: &str, raw: &str) -> Result<Vec<IpAddr>, TopologyError> {
    let config: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| malformed(node, NODE_L3_GATEWAY_CONFIG_ANNOTATION, e))?;
    let Some(default) = config.get("default") else {
        return Ok(Vec::new());
    };

    let cidrs: Vec<&str> = match (default.get("ip-addresses"), default.get("ip-address")) {
        (Some(serde_json::Value::Array(list)), _) => list
            .iter()
            .map(|v| {
                v.as_str().ok_or_else(|| {
                    malformed(node, NODE_L3_GATEWAY_CONFIG_ANNOTATION, "ip-addresses must be strings")
                })
            })
            .collect::<Result<_, _>>()?,
        (_, Some(serde_json::Value::String(single))) => vec![single.as_str()],
        _ => Vec::new(),
    };

    cidrs
        .into_iter()
        .map(|cidr| parse_cidr_address(node, NODE_L3_GATEWAY_CONFIG_ANNOTATION, cidr))
        .collect()
}

fn internal_ips(node: &Node) -> Vec<IpAddr> {
    node.status
        .as_ref()
        .and_then(|status| status.addresses.as_ref())
        .map(|addresses| {
            addresses
                .iter()
                .filter(|a| a.type_ == "InternalIP")
                .filter_map(|a| a.address.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Which Services must be re-synced after a topology change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncRequest {
    /// Every known Service
    All,
    /// Only these Services
    Services(BTreeSet<ServiceKey>),
}

/// Lock-protected registry of the nodes in this zone.
#[derive(Debug)]
pub struct NodeTopologyTracker {
    zone: String,
    nodes: Mutex<BTreeMap<String, NodeInfo>>,
}

impl NodeTopologyTracker {
    #[must_use]
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, NodeInfo>> {
        // A panic while holding the lock cannot leave a half-written entry
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a node.
    ///
    /// A node that now reports a different zone is treated as removed.
    ///
    /// # Returns
    /// `Some(ResyncRequest::All)` when the tracked topology changed, `None` when
    /// the node is identical to what is already tracked (or is foreign and was
    /// never tracked).
    ///
    /// # Errors
    /// Returns [`TopologyError::DuplicateChassisId`] when another tracked node
    /// already uses the same chassis; the tracked set is left unchanged.
    pub fn add_or_update_node(&self, info: NodeInfo) -> Result<Option<ResyncRequest>, TopologyError> {
        if info.zone != self.zone {
            debug!(node = %info.name, zone = %info.zone, "Node is outside this zone");
            return Ok(self.remove_node(&info.name));
        }

        let mut nodes = self.lock();
        if let Some(owner) = nodes
            .values()
            .find(|n| n.chassis_id == info.chassis_id && n.name != info.name)
        {
            return Err(TopologyError::DuplicateChassisId {
                node: info.name,
                chassis: info.chassis_id,
                owner: owner.name.clone(),
            });
        }

        if nodes.get(&info.name) == Some(&info) {
            return Ok(None);
        }

        info!(
            node = %info.name,
            chassis = %info.chassis_id,
            host_addresses = ?info.host_addresses,
            "Tracking node"
        );
        nodes.insert(info.name.clone(), info);
        metrics::set_tracked_nodes(nodes.len());
        Ok(Some(ResyncRequest::All))
    }

    /// Stop tracking a node.
    ///
    /// # Returns
    /// `Some(ResyncRequest::All)` if the node was tracked. Per-node references
    /// are not attributed to individual Services, so every Service is resynced.
    pub fn remove_node(&self, name: &str) -> Option<ResyncRequest> {
        let mut nodes = self.lock();
        let removed = nodes.remove(name)?;
        info!(node = %removed.name, chassis = %removed.chassis_id, "Stopped tracking node");
        metrics::set_tracked_nodes(nodes.len());
        Some(ResyncRequest::All)
    }

    /// Names of all tracked nodes, ordered.
    #[must_use]
    pub fn get_zone_nodes(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    /// Copy of every tracked node, ordered by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeInfo> {
        self.lock().values().cloned().collect()
    }
}

#[cfg(test)]
#[path = "node_tracker_tests.rs"]
mod node_tracker_tests;

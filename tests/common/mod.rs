// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared fixtures for the integration tests.
//!
//! A [`Harness`] wires a [`ServiceController`] to reflector stores that the
//! test writes into directly and to an in-memory northbound database.

#![allow(dead_code)]

use k8s_openapi::api::core::v1::{Node, Service, ServicePort, ServiceSpec};
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::{self, store::Writer};
use kube::runtime::watcher;
use ovn_services_controller::context::Stores;
use ovn_services_controller::network::NetworkInfo;
use ovn_services_controller::node_tracker::NodeTopologyTracker;
use ovn_services_controller::northbound::{LoadBalancer, MemoryNorthbound};
use ovn_services_controller::reconcilers::{DesiredStateBuilder, LbSettings, ServiceController};
use ovn_services_controller::types::{AddressFamily, ServiceKey};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const NAMESPACE: &str = "testns";

pub fn key(name: &str) -> ServiceKey {
    ServiceKey::new(NAMESPACE, name)
}

// ============================================================================
// Kubernetes object builders
// ============================================================================

/// Protocol, port and optional node port of a Service port.
pub struct PortSpec {
    pub protocol: &'static str,
    pub port: i32,
    pub node_port: Option<i32>,
}

pub fn tcp(port: i32) -> PortSpec {
    PortSpec {
        protocol: "TCP",
        port,
        node_port: None,
    }
}

pub fn tcp_node_port(port: i32, node_port: i32) -> PortSpec {
    PortSpec {
        protocol: "TCP",
        port,
        node_port: Some(node_port),
    }
}

pub fn service(name: &str, cluster_ips: &[&str], ports: &[PortSpec]) -> Service {
    let node_port = ports.iter().any(|p| p.node_port.is_some());
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(if node_port { "NodePort" } else { "ClusterIP" }.to_string()),
            cluster_ip: cluster_ips.first().map(|ip| (*ip).to_string()),
            cluster_ips: Some(cluster_ips.iter().map(|ip| (*ip).to_string()).collect()),
            ports: Some(
                ports
                    .iter()
                    .map(|p| ServicePort {
                        protocol: Some(p.protocol.to_string()),
                        port: p.port,
                        node_port: p.node_port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn with_local_traffic_policy(mut svc: Service) -> Service {
    if let Some(spec) = svc.spec.as_mut() {
        spec.external_traffic_policy = Some("Local".to_string());
    }
    svc
}

/// A ready endpoint `(address, node)`.
pub fn endpoint(address: &str, node: &str) -> Endpoint {
    Endpoint {
        addresses: vec![address.to_string()],
        conditions: Some(EndpointConditions {
            ready: Some(true),
            ..Default::default()
        }),
        node_name: Some(node.to_string()),
        ..Default::default()
    }
}

/// EndpointSlice maintained by Kubernetes for `service`.
pub fn endpoint_slice(
    name: &str,
    service: &str,
    address_type: &str,
    endpoints: Vec<Endpoint>,
    port: i32,
) -> EndpointSlice {
    slice_with_labels(
        name,
        BTreeMap::from([(
            "kubernetes.io/service-name".to_string(),
            service.to_string(),
        )]),
        address_type,
        endpoints,
        port,
    )
}

/// EndpointSlice mirrored onto a user-defined network.
pub fn mirrored_endpoint_slice(
    name: &str,
    service: &str,
    network: &str,
    endpoints: Vec<Endpoint>,
    port: i32,
) -> EndpointSlice {
    slice_with_labels(
        name,
        BTreeMap::from([
            ("k8s.ovn.org/service-name".to_string(), service.to_string()),
            (
                "k8s.ovn.org/endpointslice-network".to_string(),
                network.to_string(),
            ),
        ]),
        "IPv4",
        endpoints,
        port,
    )
}

fn slice_with_labels(
    name: &str,
    labels: BTreeMap<String, String>,
    address_type: &str,
    endpoints: Vec<Endpoint>,
    port: i32,
) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        address_type: address_type.to_string(),
        endpoints,
        ports: Some(vec![EndpointPort {
            port: Some(port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
    }
}

/// A node in the `global` zone with the given chassis and host CIDRs.
pub fn node(name: &str, chassis: &str, host_cidrs: &[&str]) -> Node {
    let cidrs = serde_json::to_string(host_cidrs).unwrap();
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(BTreeMap::from([
                (
                    "k8s.ovn.org/node-chassis-id".to_string(),
                    chassis.to_string(),
                ),
                ("k8s.ovn.org/host-cidrs".to_string(), cidrs),
            ])),
            ..Default::default()
        },
        ..Default::default()
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Reflector stores the test writes into.
pub struct Cluster {
    pub stores: Stores,
    services: Writer<Service>,
    slices: Writer<EndpointSlice>,
    nodes: Writer<Node>,
}

impl Cluster {
    pub fn new() -> Self {
        let (services_reader, services) = reflector::store::<Service>();
        let (slices_reader, slices) = reflector::store::<EndpointSlice>();
        let (nodes_reader, nodes) = reflector::store::<Node>();
        Self {
            stores: Stores {
                services: services_reader,
                endpoint_slices: slices_reader,
                nodes: nodes_reader,
            },
            services,
            slices,
            nodes,
        }
    }

    pub fn apply_service(&mut self, svc: Service) {
        self.services.apply_watcher_event(&watcher::Event::Apply(svc));
    }

    pub fn delete_service(&mut self, svc: Service) {
        self.services.apply_watcher_event(&watcher::Event::Delete(svc));
    }

    pub fn apply_slice(&mut self, slice: EndpointSlice) {
        self.slices.apply_watcher_event(&watcher::Event::Apply(slice));
    }

    pub fn apply_node(&mut self, node: Node) {
        self.nodes.apply_watcher_event(&watcher::Event::Apply(node));
    }

    pub fn delete_node(&mut self, node: Node) {
        self.nodes.apply_watcher_event(&watcher::Event::Delete(node));
    }
}

pub fn settings() -> LbSettings {
    LbSettings {
        empty_lb_events: false,
        hairpin_snat_ips: "169.254.169.5 fd69::5".to_string(),
    }
}

pub fn controller(
    cluster: &Cluster,
    db: Arc<MemoryNorthbound>,
    network: NetworkInfo,
    families: &[AddressFamily],
) -> ServiceController {
    ServiceController::new(
        Arc::new(cluster.stores.clone()),
        db,
        Arc::new(NodeTopologyTracker::new("global")),
        DesiredStateBuilder::new(
            network,
            families.iter().copied().collect::<BTreeSet<_>>(),
            settings(),
        ),
    )
}

/// One controller on the default network against a bootstrapped database.
pub struct Harness {
    pub cluster: Cluster,
    pub db: Arc<MemoryNorthbound>,
    pub controller: ServiceController,
}

impl Harness {
    /// `nodes` names the switches and gateway routers created at bootstrap.
    pub fn new(families: &[AddressFamily], nodes: &[&str]) -> Self {
        let network = NetworkInfo::default_network();
        let cluster = Cluster::new();
        let db = Arc::new(MemoryNorthbound::bootstrapped(&network, nodes));
        let controller = controller(&cluster, db.clone(), network, families);
        Self {
            cluster,
            db,
            controller,
        }
    }

    pub fn ipv4(nodes: &[&str]) -> Self {
        Self::new(&[AddressFamily::IPv4], nodes)
    }

    /// Feed a node change through the tracker and resync what it calls for.
    pub async fn node_changed(&self, name: &str) {
        if let Some(request) = self.controller.refresh_node(name) {
            self.controller.request_full_sync(request).await.unwrap();
        }
    }

    pub async fn add_node(&mut self, node: Node) {
        let name = node.metadata.name.clone().unwrap();
        self.cluster.apply_node(node);
        self.node_changed(&name).await;
    }

    pub fn load_balancer(&self, name: &str) -> Option<LoadBalancer> {
        self.db.dump().load_balancers.get(name).cloned()
    }

    pub fn group_members(&self, group: &str) -> BTreeSet<String> {
        self.db
            .dump()
            .groups
            .get(group)
            .map(|g| g.load_balancers.clone())
            .unwrap_or_default()
    }

    pub fn chassis_variables(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.db
            .dump()
            .chassis_template_vars
            .into_iter()
            .map(|(chassis, row)| (chassis, row.variables))
            .collect()
    }
}

pub fn vips(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

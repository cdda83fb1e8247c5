// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Validation of Service and EndpointSlice objects into typed inputs.
//!
//! Everything that can be wrong with user-supplied objects is caught here and
//! reported as an [`InputError`]. The desired-state builder only ever sees the
//! validated [`ServiceInput`] and [`ServiceEndpoints`].

use crate::constants::DEFAULT_AFFINITY_TIMEOUT_SECS;
use crate::sync_errors::InputError;
use crate::types::{AddressFamily, Protocol, ServiceKey};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// `externalTrafficPolicy` of a Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrafficPolicy {
    /// Every node forwards to every endpoint
    #[default]
    Cluster,
    /// A node forwards only to endpoints running on it
    Local,
}

/// One Service port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortInput {
    /// Port name; empty for a single unnamed port
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
    pub node_port: Option<u16>,
}

/// The fields of a Service that influence its load balancers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInput {
    pub key: ServiceKey,
    /// `spec.clusterIPs`, in order
    pub cluster_ips: Vec<IpAddr>,
    /// `spec.externalIPs` followed by load balancer ingress IPs
    pub external_ips: Vec<IpAddr>,
    pub ports: Vec<ServicePortInput>,
    pub external_traffic_policy: TrafficPolicy,
    /// Set when `sessionAffinity` is `ClientIP`
    pub affinity_timeout: Option<i32>,
}

impl ServiceInput {
    /// Validate a Service.
    ///
    /// # Arguments
    /// * `service` - The Kubernetes Service
    /// * `families` - Address families with a configured cluster subnet
    ///
    /// # Returns
    /// `None` for Services that never get load balancers (headless and
    /// `ExternalName`).
    ///
    /// # Errors
    /// Returns [`InputError`] for unparseable addresses, unsupported protocols,
    /// out-of-range ports, and address families without a cluster subnet.
    pub fn from_service(
        service: &Service,
        families: &BTreeSet<AddressFamily>,
    ) -> Result<Option<Self>, InputError> {
        let key = ServiceKey::new(service.namespace().unwrap_or_default(), service.name_any());
        let Some(spec) = service.spec.as_ref() else {
            return Ok(None);
        };
        if spec.type_.as_deref() == Some("ExternalName") {
            return Ok(None);
        }

        let raw_cluster_ips: Vec<&str> = match (&spec.cluster_ips, &spec.cluster_ip) {
            (Some(ips), _) if !ips.is_empty() => ips.iter().map(String::as_str).collect(),
            (_, Some(ip)) => vec![ip.as_str()],
            _ => Vec::new(),
        };
        if raw_cluster_ips.is_empty() || raw_cluster_ips.iter().any(|ip| *ip == "None") {
            return Ok(None);
        }

        for family in spec.ip_families.iter().flatten() {
            let family = AddressFamily::from_k8s(family).ok_or_else(|| {
                InputError::InvalidServiceAddress {
                    service: key.to_string(),
                    field: "spec.ipFamilies".to_string(),
                    address: family.clone(),
                }
            })?;
            require_family(&key, families, family)?;
        }

        let mut cluster_ips = Vec::with_capacity(raw_cluster_ips.len());
        for raw in raw_cluster_ips {
            let ip = parse_ip(&key, "spec.clusterIPs", raw)?;
            require_family(&key, families, AddressFamily::of(&ip))?;
            cluster_ips.push(ip);
        }

        let ingress_ips = service
            .status
            .as_ref()
            .and_then(|status| status.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|ingress| ingress.ip.as_deref());

        let mut external_ips = Vec::new();
        for (field, raw) in spec
            .external_ips
            .iter()
            .flatten()
            .map(|ip| ("spec.externalIPs", ip.as_str()))
            .chain(ingress_ips.map(|ip| ("status.loadBalancer.ingress", ip)))
        {
            let ip = parse_ip(&key, field, raw)?;
            if !families.contains(&AddressFamily::of(&ip)) {
                debug!(service = %key, %ip, "Skipping external address of a disabled family");
                continue;
            }
            if !external_ips.contains(&ip) {
                external_ips.push(ip);
            }
        }

        let mut ports = Vec::new();
        for port in spec.ports.iter().flatten() {
            let name = port.name.clone().unwrap_or_default();
            let protocol = Protocol::from_k8s(port.protocol.as_deref()).ok_or_else(|| {
                InputError::UnsupportedProtocol {
                    service: key.to_string(),
                    port: if name.is_empty() {
                        port.port.to_string()
                    } else {
                        name.clone()
                    },
                    protocol: port.protocol.clone().unwrap_or_default(),
                }
            })?;
            let node_port = match port.node_port {
                Some(0) | None => None,
                Some(value) => Some(to_port(&key, value)?),
            };
            ports.push(ServicePortInput {
                name,
                protocol,
                port: to_port(&key, port.port)?,
                node_port,
            });
        }

        let external_traffic_policy = match spec.external_traffic_policy.as_deref() {
            Some("Local") if node_ports_allowed(spec.type_.as_deref()) => TrafficPolicy::Local,
            _ => TrafficPolicy::Cluster,
        };

        let affinity_timeout = (spec.session_affinity.as_deref() == Some("ClientIP")).then(|| {
            spec.session_affinity_config
                .as_ref()
                .and_then(|config| config.client_ip.as_ref())
                .and_then(|client_ip| client_ip.timeout_seconds)
                .unwrap_or(DEFAULT_AFFINITY_TIMEOUT_SECS)
        });

        Ok(Some(Self {
            key,
            cluster_ips,
            external_ips,
            ports,
            external_traffic_policy,
            affinity_timeout,
        }))
    }

    /// Cluster IPs followed by external and ingress IPs, without duplicates.
    pub fn frontend_ips(&self) -> impl Iterator<Item = &IpAddr> {
        self.cluster_ips.iter().chain(
            self.external_ips
                .iter()
                .filter(|ip| !self.cluster_ips.contains(ip)),
        )
    }
}

fn node_ports_allowed(service_type: Option<&str>) -> bool {
    matches!(service_type, Some("NodePort" | "LoadBalancer"))
}

fn require_family(
    key: &ServiceKey,
    families: &BTreeSet<AddressFamily>,
    family: AddressFamily,
) -> Result<(), InputError> {
    if families.contains(&family) {
        Ok(())
    } else {
        Err(InputError::UnsupportedAddressFamily {
            service: key.to_string(),
            family: family.to_string(),
        })
    }
}

fn parse_ip(key: &ServiceKey, field: &str, raw: &str) -> Result<IpAddr, InputError> {
    raw.parse().map_err(|_| InputError::InvalidServiceAddress {
        service: key.to_string(),
        field: field.to_string(),
        address: raw.to_string(),
    })
}

fn to_port(key: &ServiceKey, value: i32) -> Result<u16, InputError> {
    u16::try_from(value)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| InputError::InvalidPort {
            service: key.to_string(),
            port: value,
        })
}

/// One ready backend of a Service port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub ip: IpAddr,
    /// Target port on the backend
    pub port: u16,
    /// Node the backend runs on, if reported
    pub node: Option<String>,
}

/// Ready backends of a Service, grouped by (port name, protocol).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEndpoints {
    ports: BTreeMap<(String, Protocol), Vec<Backend>>,
}

impl ServiceEndpoints {
    /// Collect the ready backends from a Service's EndpointSlices.
    ///
    /// Slices are visited in name order so the result does not depend on store
    /// iteration order; within a slice the endpoint order is kept. Each address
    /// appears at most once per port.
    ///
    /// # Errors
    /// Returns [`InputError::MalformedEndpointSlice`] for addresses that are not
    /// IPs of the slice's address type, and for invalid port numbers.
    pub fn from_slices(key: &ServiceKey, slices: &[Arc<EndpointSlice>]) -> Result<Self, InputError> {
        let mut ordered: Vec<&EndpointSlice> = slices.iter().map(AsRef::as_ref).collect();
        ordered.sort_by_key(|slice| slice.name_any());

        let mut collected = Self::default();
        for slice in ordered {
            let Some(family) = AddressFamily::from_k8s(&slice.address_type) else {
                debug!(service = %key, slice = %slice.name_any(), address_type = %slice.address_type, "Ignoring non-IP EndpointSlice");
                continue;
            };
            let malformed = |reason: String| InputError::MalformedEndpointSlice {
                service: key.to_string(),
                slice: slice.name_any(),
                reason,
            };

            for slice_port in slice.ports.iter().flatten() {
                let Some(number) = slice_port.port else {
                    continue;
                };
                let port = u16::try_from(number)
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| malformed(format!("port {number} is out of range")))?;
                let protocol = Protocol::from_k8s(slice_port.protocol.as_deref()).ok_or_else(|| {
                    malformed(format!(
                        "unsupported protocol '{}'",
                        slice_port.protocol.clone().unwrap_or_default()
                    ))
                })?;
                let backends = collected
                    .ports
                    .entry((slice_port.name.clone().unwrap_or_default(), protocol))
                    .or_default();

                for endpoint in &slice.endpoints {
                    let ready = endpoint
                        .conditions
                        .as_ref()
                        .and_then(|c| c.ready)
                        .unwrap_or(true);
                    if !ready {
                        continue;
                    }
                    for raw in &endpoint.addresses {
                        let ip: IpAddr = raw
                            .parse()
                            .map_err(|_| malformed(format!("address '{raw}' is not an IP")))?;
                        if AddressFamily::of(&ip) != family {
                            return Err(malformed(format!(
                                "address '{raw}' does not match address type {family}"
                            )));
                        }
                        if backends.iter().any(|b| b.ip == ip) {
                            continue;
                        }
                        backends.push(Backend {
                            ip,
                            port,
                            node: endpoint.node_name.clone(),
                        });
                    }
                }
            }
        }
        Ok(collected)
    }

    /// Ready backends of one Service port and family, in order.
    pub fn backends<'a>(
        &'a self,
        port: &ServicePortInput,
        family: AddressFamily,
    ) -> impl Iterator<Item = &'a Backend> + 'a {
        self.ports
            .get(&(port.name.clone(), port.protocol))
            .into_iter()
            .flatten()
            .filter(move |backend| AddressFamily::of(&backend.ip) == family)
    }
}

#[cfg(test)]
#[path = "service_input_tests.rs"]
mod service_input_tests;

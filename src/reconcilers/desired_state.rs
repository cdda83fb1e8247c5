// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Desired northbound state of a single Service.
//!
//! [`DesiredStateBuilder::build`] is a pure function of the Service, its
//! EndpointSlices and a node snapshot. It never reads the database.
//!
//! # Record layout
//!
//! - One cluster-wide record per protocol, holding every ClusterIP, external
//!   IP and ingress IP VIP. It joins the cluster group.
//! - With node ports and `Cluster` traffic policy, one merged template record
//!   per protocol and family. Its VIPs are `^NODEIP_<family>_<i>:<nodePort>`
//!   for every index `i` any node has, so the record size does not grow with
//!   the node count. It joins the switch and router groups.
//! - With node ports and `Local` traffic policy, the merged record is split in
//!   two. The switch template record forwards to every endpoint. The router
//!   template record forwards to a per-Service template target whose value on
//!   each chassis lists only that node's endpoints.
//!
//! Empty endpoint lists still produce their VIP, mapped to `""`, which the
//! datapath turns into a reject.

use super::service_input::{
    Backend, ServiceEndpoints, ServiceInput, ServicePortInput, TrafficPolicy,
};
use crate::labels::{EXTERNAL_ID_KIND, EXTERNAL_ID_OWNER, KIND_SERVICE};
use crate::constants::NEIGHBOR_RESPONDER_NONE;
use crate::naming::{
    cluster_lb_name, ip_port, join_endpoints, lb_group_name, local_target_var_name,
    merged_template_lb_name, node_template_var_name, router_template_lb_name,
    switch_template_lb_name, template_reference, template_vip, LbGroup,
};
use crate::network::NetworkInfo;
use crate::node_tracker::NodeInfo;
use crate::northbound::LoadBalancer;
use crate::sync_errors::InputError;
use crate::types::{AddressFamily, Protocol, ServiceKey};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Option values shared by every Service load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbSettings {
    /// Emit controller events instead of rejecting when a VIP has no endpoints
    pub empty_lb_events: bool,
    /// Space-separated hairpin SNAT addresses, one per family
    pub hairpin_snat_ips: String,
}

/// Everything one Service should own in the northbound database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    /// Load balancers by name
    pub load_balancers: BTreeMap<String, LoadBalancer>,
    /// Every network group mapped to the load balancers of this Service it
    /// must contain; groups the Service should not be in map to an empty set
    pub group_memberships: BTreeMap<String, BTreeSet<String>>,
    /// Chassis to the template variables this Service needs on it
    pub template_variables: BTreeMap<String, BTreeMap<String, String>>,
    /// Chassis of every tracked node
    pub known_chassis: BTreeSet<String>,
}

/// Computes [`DesiredState`] for Services on one network.
#[derive(Debug, Clone)]
pub struct DesiredStateBuilder {
    network: NetworkInfo,
    families: BTreeSet<AddressFamily>,
    settings: LbSettings,
}

impl DesiredStateBuilder {
    /// # Arguments
    /// * `network` - Network whose names and tags are produced
    /// * `families` - Address families with a configured cluster subnet
    /// * `settings` - Option values shared by every record
    #[must_use]
    pub fn new(network: NetworkInfo, families: BTreeSet<AddressFamily>, settings: LbSettings) -> Self {
        Self {
            network,
            families,
            settings,
        }
    }

    #[must_use]
    pub fn network(&self) -> &NetworkInfo {
        &self.network
    }

    /// Validate the raw objects and build the desired state.
    ///
    /// A missing Service (deleted) yields no load balancers; node template
    /// variables are still produced so the sync keeps them current.
    ///
    /// # Errors
    /// Returns [`InputError`] if the Service or an EndpointSlice is invalid.
    pub fn build(
        &self,
        key: &ServiceKey,
        service: Option<&Service>,
        slices: &[Arc<EndpointSlice>],
        nodes: &[NodeInfo],
    ) -> Result<DesiredState, InputError> {
        let input = match service {
            Some(service) => ServiceInput::from_service(service, &self.families)?,
            None => None,
        };
        let endpoints = match input {
            Some(_) => ServiceEndpoints::from_slices(key, slices)?,
            None => ServiceEndpoints::default(),
        };
        Ok(self.build_from_inputs(key, input.as_ref(), &endpoints, nodes))
    }

    /// Build the desired state from validated inputs.
    #[must_use]
    pub fn build_from_inputs(
        &self,
        key: &ServiceKey,
        service: Option<&ServiceInput>,
        endpoints: &ServiceEndpoints,
        nodes: &[NodeInfo],
    ) -> DesiredState {
        let mut desired = DesiredState {
            group_memberships: LbGroup::ALL
                .iter()
                .map(|group| (lb_group_name(&self.network, *group), BTreeSet::new()))
                .collect(),
            known_chassis: nodes.iter().map(|n| n.chassis_id.clone()).collect(),
            ..Default::default()
        };

        // Node address variables, and how many indexes each family needs
        let mut template_slots: BTreeMap<AddressFamily, usize> = BTreeMap::new();
        for node in nodes {
            for family in &self.families {
                let mut count = 0;
                for (index, ip) in node.host_addresses_of(*family).enumerate() {
                    desired
                        .template_variables
                        .entry(node.chassis_id.clone())
                        .or_default()
                        .insert(node_template_var_name(*family, index), ip.to_string());
                    count = index + 1;
                }
                let slots = template_slots.entry(*family).or_default();
                *slots = (*slots).max(count);
            }
        }

        let Some(service) = service else {
            return desired;
        };

        let mut by_protocol: BTreeMap<Protocol, Vec<&ServicePortInput>> = BTreeMap::new();
        for port in &service.ports {
            by_protocol.entry(port.protocol).or_default().push(port);
        }

        for (protocol, ports) in by_protocol {
            self.add_cluster_record(&mut desired, key, service, endpoints, protocol, &ports);

            let node_ports: Vec<&ServicePortInput> =
                ports.iter().copied().filter(|p| p.node_port.is_some()).collect();
            if node_ports.is_empty() {
                continue;
            }
            for family in &self.families {
                let slots = template_slots.get(family).copied().unwrap_or_default();
                if slots == 0 {
                    continue;
                }
                match service.external_traffic_policy {
                    TrafficPolicy::Cluster => self.add_merged_template_record(
                        &mut desired,
                        key,
                        service,
                        endpoints,
                        protocol,
                        *family,
                        &node_ports,
                        slots,
                    ),
                    TrafficPolicy::Local => self.add_local_template_records(
                        &mut desired,
                        key,
                        service,
                        endpoints,
                        nodes,
                        protocol,
                        *family,
                        &node_ports,
                        slots,
                    ),
                }
            }
        }

        desired
    }

    fn add_cluster_record(
        &self,
        desired: &mut DesiredState,
        key: &ServiceKey,
        service: &ServiceInput,
        endpoints: &ServiceEndpoints,
        protocol: Protocol,
        ports: &[&ServicePortInput],
    ) {
        let mut vips = BTreeMap::new();
        for port in ports {
            for vip in service.frontend_ips() {
                let backends = endpoints.backends(port, AddressFamily::of(vip));
                vips.insert(ip_port(vip, port.port), endpoint_list(backends));
            }
        }
        if vips.is_empty() {
            return;
        }

        let name = cluster_lb_name(&self.network, key, protocol);
        self.insert_record(
            desired,
            LoadBalancer {
                name,
                protocol,
                vips,
                options: self.options(service, None, false),
                external_ids: self.external_ids(key),
            },
            &[LbGroup::Cluster],
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn add_merged_template_record(
        &self,
        desired: &mut DesiredState,
        key: &ServiceKey,
        service: &ServiceInput,
        endpoints: &ServiceEndpoints,
        protocol: Protocol,
        family: AddressFamily,
        node_ports: &[&ServicePortInput],
        slots: usize,
    ) {
        let vips = template_vips(node_ports, family, slots, |port| {
            endpoint_list(endpoints.backends(port, family))
        });
        self.insert_record(
            desired,
            LoadBalancer {
                name: merged_template_lb_name(&self.network, key, protocol, family),
                protocol,
                vips,
                options: self.options(service, Some(family), false),
                external_ids: self.external_ids(key),
            },
            &[LbGroup::Switch, LbGroup::Router],
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn add_local_template_records(
        &self,
        desired: &mut DesiredState,
        key: &ServiceKey,
        service: &ServiceInput,
        endpoints: &ServiceEndpoints,
        nodes: &[NodeInfo],
        protocol: Protocol,
        family: AddressFamily,
        node_ports: &[&ServicePortInput],
        slots: usize,
    ) {
        let switch_vips = template_vips(node_ports, family, slots, |port| {
            endpoint_list(endpoints.backends(port, family))
        });
        self.insert_record(
            desired,
            LoadBalancer {
                name: switch_template_lb_name(&self.network, key, protocol, family),
                protocol,
                vips: switch_vips,
                options: self.options(service, Some(family), false),
                external_ids: self.external_ids(key),
            },
            &[LbGroup::Switch],
        );

        let router_vips = template_vips(node_ports, family, slots, |port| {
            template_reference(&local_target_var_name(
                &self.network,
                key,
                protocol,
                port.port,
                family,
            ))
        });
        self.insert_record(
            desired,
            LoadBalancer {
                name: router_template_lb_name(&self.network, key, protocol, family),
                protocol,
                vips: router_vips,
                options: self.options(service, Some(family), true),
                external_ids: self.external_ids(key),
            },
            &[LbGroup::Router],
        );

        for node in nodes {
            if node.host_addresses_of(family).next().is_none() {
                continue;
            }
            let variables = desired
                .template_variables
                .entry(node.chassis_id.clone())
                .or_default();
            for port in node_ports {
                let local = endpoints
                    .backends(port, family)
                    .filter(|backend| backend.node.as_deref() == Some(node.name.as_str()));
                variables.insert(
                    local_target_var_name(&self.network, key, protocol, port.port, family),
                    endpoint_list(local),
                );
            }
        }
    }

    fn insert_record(&self, desired: &mut DesiredState, lb: LoadBalancer, groups: &[LbGroup]) {
        for group in groups {
            desired
                .group_memberships
                .entry(lb_group_name(&self.network, *group))
                .or_default()
                .insert(lb.name.clone());
        }
        desired.load_balancers.insert(lb.name.clone(), lb);
    }

    fn options(
        &self,
        service: &ServiceInput,
        template: Option<AddressFamily>,
        skip_snat: bool,
    ) -> BTreeMap<String, String> {
        let mut options = BTreeMap::from([
            ("event".to_string(), self.settings.empty_lb_events.to_string()),
            ("reject".to_string(), (!self.settings.empty_lb_events).to_string()),
            ("skip_snat".to_string(), skip_snat.to_string()),
            (
                "neighbor_responder".to_string(),
                NEIGHBOR_RESPONDER_NONE.to_string(),
            ),
            (
                "hairpin_snat_ip".to_string(),
                self.settings.hairpin_snat_ips.clone(),
            ),
        ]);
        if let Some(timeout) = service.affinity_timeout {
            options.insert("affinity_timeout".to_string(), timeout.to_string());
        }
        if let Some(family) = template {
            options.insert("template".to_string(), "true".to_string());
            options.insert(
                "address-family".to_string(),
                family.option_value().to_string(),
            );
        }
        options
    }

    fn external_ids(&self, key: &ServiceKey) -> BTreeMap<String, String> {
        let mut ids = self.network.external_ids();
        ids.insert(EXTERNAL_ID_KIND.to_string(), KIND_SERVICE.to_string());
        ids.insert(EXTERNAL_ID_OWNER.to_string(), key.to_string());
        ids
    }
}

fn endpoint_list<'a>(backends: impl Iterator<Item = &'a Backend>) -> String {
    join_endpoints(backends.map(|b| (&b.ip, b.port)))
}

/// `^NODEIP_<family>_<i>:<nodePort>` for every node port and index.
fn template_vips(
    node_ports: &[&ServicePortInput],
    family: AddressFamily,
    slots: usize,
    mut target: impl FnMut(&ServicePortInput) -> String,
) -> BTreeMap<String, String> {
    let mut vips = BTreeMap::new();
    for port in node_ports {
        let Some(node_port) = port.node_port else {
            continue;
        };
        let value = target(port);
        for index in 0..slots {
            vips.insert(
                template_vip(&node_template_var_name(family, index), node_port),
                value.clone(),
            );
        }
    }
    vips
}

#[cfg(test)]
#[path = "desired_state_tests.rs"]
mod desired_state_tests;

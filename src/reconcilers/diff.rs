// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Minimal northbound operations that turn the current state into the desired one.
//!
//! Only fields the controller writes are compared, so unchanged inputs always
//! produce an empty operation list. Operations are ordered so every reference
//! added points at a row that exists and every row deleted is no longer
//! referenced by this Service.

use super::desired_state::DesiredState;
use crate::constants::NODE_TEMPLATE_PREFIX;
use crate::naming::local_target_prefix;
use crate::network::NetworkInfo;
use crate::northbound::{NorthboundState, Operation};
use crate::sync_errors::BootstrapError;
use crate::types::ServiceKey;
use std::collections::{BTreeMap, BTreeSet};

/// Compute the operations for one Service.
///
/// # Arguments
/// * `network` - Network the Service is synced on
/// * `key` - The Service
/// * `desired` - Output of the desired-state builder
/// * `current` - Northbound rows read for this Service
///
/// # Errors
/// Returns [`BootstrapError`] when one of the network's load balancer groups
/// does not exist.
pub fn compute_operations(
    network: &NetworkInfo,
    key: &ServiceKey,
    desired: &DesiredState,
    current: &NorthboundState,
) -> Result<Vec<Operation>, BootstrapError> {
    for group in desired.group_memberships.keys() {
        if !current.groups.contains_key(group) {
            return Err(BootstrapError::MissingLoadBalancerGroup {
                group: group.clone(),
                network: network.name().to_string(),
            });
        }
    }

    let mut ops = Vec::new();

    for (name, lb) in &desired.load_balancers {
        match current.load_balancers.get(name) {
            None => ops.push(Operation::CreateLoadBalancer(lb.clone())),
            Some(existing) if existing.differs_from(lb) => {
                ops.push(Operation::UpdateLoadBalancer(lb.clone()));
            }
            Some(_) => {}
        }
    }

    // Every load balancer name this Service owns, now or before this sync
    let owned: BTreeSet<&String> = current
        .load_balancers
        .keys()
        .chain(desired.load_balancers.keys())
        .collect();

    for (group, wanted) in &desired.group_memberships {
        let members = &current.groups[group].load_balancers;
        let missing: BTreeSet<String> = wanted.difference(members).cloned().collect();
        if !missing.is_empty() {
            ops.push(Operation::AddToGroup {
                group: group.clone(),
                load_balancers: missing,
            });
        }
    }

    for (group, wanted) in &desired.group_memberships {
        let stale: BTreeSet<String> = current.groups[group]
            .load_balancers
            .iter()
            .filter(|name| owned.contains(name) && !wanted.contains(*name))
            .cloned()
            .collect();
        if !stale.is_empty() {
            ops.push(Operation::RemoveFromGroup {
                group: group.clone(),
                load_balancers: stale,
            });
        }
    }

    // Attachments are expressed through groups only
    for switch in &current.switches {
        let direct = owned_attachments(&switch.load_balancers, &owned);
        if !direct.is_empty() {
            ops.push(Operation::DetachFromSwitch {
                switch: switch.name.clone(),
                load_balancers: direct,
            });
        }
    }
    for router in &current.routers {
        let direct = owned_attachments(&router.load_balancers, &owned);
        if !direct.is_empty() {
            ops.push(Operation::DetachFromRouter {
                router: router.name.clone(),
                load_balancers: direct,
            });
        }
    }

    for name in current.load_balancers.keys() {
        if !desired.load_balancers.contains_key(name) {
            ops.push(Operation::DeleteLoadBalancer { name: name.clone() });
        }
    }

    template_variable_operations(network, key, desired, current, &mut ops);

    Ok(ops)
}

fn owned_attachments(attached: &BTreeSet<String>, owned: &BTreeSet<&String>) -> BTreeSet<String> {
    attached
        .iter()
        .filter(|name| owned.contains(name))
        .cloned()
        .collect()
}

fn template_variable_operations(
    network: &NetworkInfo,
    key: &ServiceKey,
    desired: &DesiredState,
    current: &NorthboundState,
    ops: &mut Vec<Operation>,
) {
    let target_prefix = local_target_prefix(network, key);
    let managed =
        |name: &str| name.starts_with(NODE_TEMPLATE_PREFIX) || name.starts_with(&target_prefix);
    let empty = BTreeMap::new();

    let chassis: BTreeSet<&String> = desired
        .template_variables
        .keys()
        .chain(current.chassis_template_vars.keys())
        .collect();

    for chassis in chassis {
        let existing = current.chassis_template_vars.get(chassis);
        let wanted = desired.template_variables.get(chassis).unwrap_or(&empty);

        if existing.is_some() && !desired.known_chassis.contains(chassis) {
            ops.push(Operation::DeleteChassisTemplateVar {
                chassis: chassis.clone(),
            });
            continue;
        }

        let have = existing.map_or(&empty, |row| &row.variables);
        let set: BTreeMap<String, String> = wanted
            .iter()
            .filter(|(name, value)| have.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let remove: BTreeSet<String> = have
            .keys()
            .filter(|name| managed(name) && !wanted.contains_key(*name))
            .cloned()
            .collect();

        if existing.is_some() && wanted.is_empty() && remove.len() == have.len() {
            ops.push(Operation::DeleteChassisTemplateVar {
                chassis: chassis.clone(),
            });
            continue;
        }
        if !set.is_empty() {
            ops.push(Operation::SetChassisTemplateVariables {
                chassis: chassis.clone(),
                variables: set,
            });
        }
        if !remove.is_empty() {
            ops.push(Operation::RemoveChassisTemplateVariables {
                chassis: chassis.clone(),
                names: remove,
            });
        }
    }
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod diff_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process northbound database.
//!
//! Transactions are applied to a copy of the tables and swapped in only when
//! every operation succeeded. Deleting a load balancer also drops every
//! reference to it, the way weak references behave in the real schema.

use super::{
    ChassisTemplateVar, LoadBalancer, LoadBalancerGroup, LogicalDatapath, NorthboundClient,
    NorthboundState, Operation, StateFilter,
};
use crate::naming::{lb_group_name, LbGroup};
use crate::network::NetworkInfo;
use crate::sync_errors::BackendError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Every table the controller touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tables {
    pub load_balancers: BTreeMap<String, LoadBalancer>,
    pub groups: BTreeMap<String, LoadBalancerGroup>,
    pub switches: BTreeMap<String, LogicalDatapath>,
    pub routers: BTreeMap<String, LogicalDatapath>,
    pub chassis_template_vars: BTreeMap<String, ChassisTemplateVar>,
}

impl Tables {
    fn apply(&mut self, op: Operation) -> Result<(), String> {
        match op {
            Operation::CreateLoadBalancer(lb) => {
                if self.load_balancers.contains_key(&lb.name) {
                    return Err(format!("load balancer {} already exists", lb.name));
                }
                self.load_balancers.insert(lb.name.clone(), lb);
            }
            Operation::UpdateLoadBalancer(lb) => {
                let Some(existing) = self.load_balancers.get_mut(&lb.name) else {
                    return Err(format!("load balancer {} does not exist", lb.name));
                };
                *existing = lb;
            }
            Operation::DeleteLoadBalancer { name } => {
                if self.load_balancers.remove(&name).is_none() {
                    return Err(format!("load balancer {name} does not exist"));
                }
                for group in self.groups.values_mut() {
                    group.load_balancers.remove(&name);
                }
                for datapath in self.switches.values_mut().chain(self.routers.values_mut()) {
                    datapath.load_balancers.remove(&name);
                }
            }
            Operation::AddToGroup {
                group,
                load_balancers,
            } => {
                if let Some(missing) = load_balancers
                    .iter()
                    .find(|name| !self.load_balancers.contains_key(*name))
                {
                    return Err(format!("load balancer {missing} does not exist"));
                }
                let Some(row) = self.groups.get_mut(&group) else {
                    return Err(format!("load balancer group {group} does not exist"));
                };
                row.load_balancers.extend(load_balancers);
            }
            Operation::RemoveFromGroup {
                group,
                load_balancers,
            } => {
                let Some(row) = self.groups.get_mut(&group) else {
                    return Err(format!("load balancer group {group} does not exist"));
                };
                row.load_balancers.retain(|name| !load_balancers.contains(name));
            }
            Operation::DetachFromSwitch {
                switch,
                load_balancers,
            } => {
                let Some(row) = self.switches.get_mut(&switch) else {
                    return Err(format!("logical switch {switch} does not exist"));
                };
                row.load_balancers.retain(|name| !load_balancers.contains(name));
            }
            Operation::DetachFromRouter {
                router,
                load_balancers,
            } => {
                let Some(row) = self.routers.get_mut(&router) else {
                    return Err(format!("logical router {router} does not exist"));
                };
                row.load_balancers.retain(|name| !load_balancers.contains(name));
            }
            Operation::SetChassisTemplateVariables { chassis, variables } => {
                self.chassis_template_vars
                    .entry(chassis.clone())
                    .or_insert_with(|| ChassisTemplateVar {
                        chassis,
                        variables: BTreeMap::new(),
                    })
                    .variables
                    .extend(variables);
            }
            Operation::RemoveChassisTemplateVariables { chassis, names } => {
                let Some(row) = self.chassis_template_vars.get_mut(&chassis) else {
                    return Err(format!("chassis template var {chassis} does not exist"));
                };
                row.variables.retain(|name, _| !names.contains(name));
            }
            Operation::DeleteChassisTemplateVar { chassis } => {
                if self.chassis_template_vars.remove(&chassis).is_none() {
                    return Err(format!("chassis template var {chassis} does not exist"));
                }
            }
        }
        Ok(())
    }
}

/// Thread-safe in-memory northbound database.
#[derive(Debug, Default)]
pub struct MemoryNorthbound {
    tables: Mutex<Tables>,
    fail_next: Mutex<Option<String>>,
    transactions: AtomicUsize,
    operations: AtomicUsize,
}

impl MemoryNorthbound {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Database with the bootstrap rows of `network` already present: the three
    /// load balancer groups plus a switch and gateway router per node, each
    /// attached to its groups.
    #[must_use]
    pub fn bootstrapped(network: &NetworkInfo, nodes: &[&str]) -> Self {
        let db = Self::new();
        db.bootstrap_network(network, nodes);
        db
    }

    /// Add the bootstrap rows of another network.
    pub fn bootstrap_network(&self, network: &NetworkInfo, nodes: &[&str]) {
        let mut tables = self.lock();
        for group in LbGroup::ALL {
            let name = lb_group_name(network, group);
            tables.groups.insert(
                name.clone(),
                LoadBalancerGroup {
                    name,
                    ..Default::default()
                },
            );
        }
        for node in nodes {
            let switch = crate::naming::switch_name(network, node);
            let router = crate::naming::gateway_router_name(network, node);
            tables.switches.insert(
                switch.clone(),
                LogicalDatapath {
                    name: switch,
                    load_balancers: Default::default(),
                    load_balancer_groups: [LbGroup::Cluster, LbGroup::Switch]
                        .into_iter()
                        .map(|g| lb_group_name(network, g))
                        .collect(),
                },
            );
            tables.routers.insert(
                router.clone(),
                LogicalDatapath {
                    name: router,
                    load_balancers: Default::default(),
                    load_balancer_groups: [LbGroup::Cluster, LbGroup::Router]
                        .into_iter()
                        .map(|g| lb_group_name(network, g))
                        .collect(),
                },
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of every table.
    #[must_use]
    pub fn dump(&self) -> Tables {
        self.lock().clone()
    }

    /// Run `f` against the tables directly, bypassing transactions. Used to seed
    /// pre-existing (possibly stale) rows.
    pub fn seed<F: FnOnce(&mut Tables)>(&self, f: F) {
        f(&mut self.lock());
    }

    /// Make the next transaction fail with `reason` without applying anything.
    pub fn fail_next_transaction(&self, reason: impl Into<String>) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Number of operations across all committed transactions.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NorthboundClient for MemoryNorthbound {
    async fn current_state(&self, filter: &StateFilter) -> Result<NorthboundState, BackendError> {
        let tables = self.lock();

        let load_balancers: BTreeMap<_, _> = tables
            .load_balancers
            .values()
            .filter(|lb| filter.matches(lb))
            .map(|lb| (lb.name.clone(), lb.clone()))
            .collect();

        let groups = LbGroup::ALL
            .iter()
            .filter_map(|group| tables.groups.get(&lb_group_name(&filter.network, *group)))
            .map(|group| (group.name.clone(), group.clone()))
            .collect();

        let referencing = |datapaths: &BTreeMap<String, LogicalDatapath>| -> Vec<LogicalDatapath> {
            datapaths
                .values()
                .filter(|dp| dp.load_balancers.iter().any(|lb| load_balancers.contains_key(lb)))
                .cloned()
                .collect()
        };

        Ok(NorthboundState {
            switches: referencing(&tables.switches),
            routers: referencing(&tables.routers),
            chassis_template_vars: tables.chassis_template_vars.clone(),
            groups,
            load_balancers,
        })
    }

    async fn transact(&self, operations: Vec<Operation>) -> Result<(), BackendError> {
        let count = operations.len();
        if let Some(reason) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(BackendError::TransactionFailed {
                operations: count,
                reason,
            });
        }

        let mut tables = self.lock();
        let mut staged = tables.clone();
        for op in operations {
            let kind = op.kind();
            staged
                .apply(op)
                .map_err(|reason| BackendError::TransactionFailed {
                    operations: count,
                    reason: format!("{kind}: {reason}"),
                })?;
        }
        *tables = staged;

        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.operations.fetch_add(count, Ordering::SeqCst);
        debug!(operations = count, "Committed in-memory northbound transaction");
        Ok(())
    }
}

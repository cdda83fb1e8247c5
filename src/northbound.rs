// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Northbound database rows and the transaction collaborator.
//!
//! Only the rows and columns the Service controller reads or writes are
//! modelled. The wire protocol is someone else's problem: anything that can
//! answer [`NorthboundClient::current_state`] and apply an all-or-nothing
//! [`NorthboundClient::transact`] can back the controller. [`memory`] provides
//! an in-process implementation used by tests and `--dry-run`.
//!
//! Shared rows (load balancer groups, switches, routers, chassis template
//! variables) are only ever *mutated* (members inserted or deleted), never
//! replaced, so concurrent syncs of different Services cannot overwrite each
//! other's changes.

pub mod memory;

use crate::labels::{EXTERNAL_ID_KIND, EXTERNAL_ID_OWNER, KIND_SERVICE};
use crate::network::NetworkInfo;
use crate::sync_errors::BackendError;
use crate::types::{Protocol, ServiceKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub use memory::MemoryNorthbound;

/// `Load_Balancer` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    pub protocol: Protocol,
    /// VIP (`ip:port` or template reference) to comma-joined endpoints
    pub vips: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
    pub external_ids: BTreeMap<String, String>,
}

impl LoadBalancer {
    /// Service that owns this load balancer, from its external IDs.
    #[must_use]
    pub fn owner(&self) -> Option<ServiceKey> {
        if self.external_ids.get(EXTERNAL_ID_KIND).map(String::as_str) != Some(KIND_SERVICE) {
            return None;
        }
        self.external_ids
            .get(EXTERNAL_ID_OWNER)
            .and_then(|owner| ServiceKey::from_owner(owner))
    }

    /// Whether any field the controller writes differs from `other`.
    #[must_use]
    pub fn differs_from(&self, other: &LoadBalancer) -> bool {
        self.protocol != other.protocol
            || self.vips != other.vips
            || self.options != other.options
            || self.external_ids != other.external_ids
    }
}

/// `Load_Balancer_Group` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerGroup {
    pub name: String,
    pub load_balancers: BTreeSet<String>,
}

/// `Logical_Switch` or `Logical_Router` row, reduced to its load balancer columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalDatapath {
    pub name: String,
    /// Load balancers attached directly
    pub load_balancers: BTreeSet<String>,
    /// Load balancer groups attached
    pub load_balancer_groups: BTreeSet<String>,
}

/// `Chassis_Template_Var` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChassisTemplateVar {
    pub chassis: String,
    pub variables: BTreeMap<String, String>,
}

/// Selects the Service load balancers a sync cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFilter {
    pub network: NetworkInfo,
    /// Restrict to one Service; `None` selects every Service on the network
    pub owner: Option<ServiceKey>,
}

impl StateFilter {
    #[must_use]
    pub fn matches(&self, lb: &LoadBalancer) -> bool {
        let Some(owner) = lb.owner() else {
            return false;
        };
        self.network.owns_external_ids(&lb.external_ids)
            && self.owner.as_ref().is_none_or(|wanted| wanted == &owner)
    }
}

/// Rows relevant to one sync, read in a single consistent view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NorthboundState {
    /// Load balancers matching the filter, by name
    pub load_balancers: BTreeMap<String, LoadBalancer>,
    /// The network's load balancer groups that exist, by name
    pub groups: BTreeMap<String, LoadBalancerGroup>,
    /// Switches referencing a matched load balancer directly
    pub switches: Vec<LogicalDatapath>,
    /// Routers referencing a matched load balancer directly
    pub routers: Vec<LogicalDatapath>,
    /// Every chassis template variable row, by chassis
    pub chassis_template_vars: BTreeMap<String, ChassisTemplateVar>,
}

/// One mutation inside a northbound transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    CreateLoadBalancer(LoadBalancer),
    UpdateLoadBalancer(LoadBalancer),
    DeleteLoadBalancer {
        name: String,
    },
    AddToGroup {
        group: String,
        load_balancers: BTreeSet<String>,
    },
    RemoveFromGroup {
        group: String,
        load_balancers: BTreeSet<String>,
    },
    DetachFromSwitch {
        switch: String,
        load_balancers: BTreeSet<String>,
    },
    DetachFromRouter {
        router: String,
        load_balancers: BTreeSet<String>,
    },
    /// Insert or overwrite variables, creating the row if needed
    SetChassisTemplateVariables {
        chassis: String,
        variables: BTreeMap<String, String>,
    },
    RemoveChassisTemplateVariables {
        chassis: String,
        names: BTreeSet<String>,
    },
    DeleteChassisTemplateVar {
        chassis: String,
    },
}

impl Operation {
    /// Short label used for logging and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateLoadBalancer(_) => "create_load_balancer",
            Self::UpdateLoadBalancer(_) => "update_load_balancer",
            Self::DeleteLoadBalancer { .. } => "delete_load_balancer",
            Self::AddToGroup { .. } => "add_to_group",
            Self::RemoveFromGroup { .. } => "remove_from_group",
            Self::DetachFromSwitch { .. } => "detach_from_switch",
            Self::DetachFromRouter { .. } => "detach_from_router",
            Self::SetChassisTemplateVariables { .. } => "set_template_variables",
            Self::RemoveChassisTemplateVariables { .. } => "remove_template_variables",
            Self::DeleteChassisTemplateVar { .. } => "delete_template_var",
        }
    }
}

/// Backend transaction collaborator.
#[async_trait]
pub trait NorthboundClient: Send + Sync {
    /// Read the rows selected by `filter` plus the network's shared rows.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the database cannot be read.
    async fn current_state(&self, filter: &StateFilter) -> Result<NorthboundState, BackendError>;

    /// Apply every operation or none of them.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the transaction was rejected; nothing was applied.
    async fn transact(&self, operations: Vec<Operation>) -> Result<(), BackendError>;
}

#[cfg(test)]
#[path = "northbound_tests.rs"]
mod northbound_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Logical network scoping.
//!
//! The same node topology can host the cluster default network and any number
//! of user-defined networks. Each network gets its own load balancers, groups,
//! switches and routers in the northbound database; [`NetworkInfo`] is the one
//! place that decides how a network-independent name or tag set is projected
//! onto a particular network.
//!
//! For the default network every name is used unchanged. A user-defined network
//! prefixes every name with its sanitized network name (`tenant-red` becomes
//! `tenant.red_`).

use crate::constants::DEFAULT_NETWORK_NAME;
use crate::labels::{
    EXTERNAL_ID_NETWORK, EXTERNAL_ID_ROLE, K8S_SERVICE_NAME, OVN_ENDPOINTSLICE_NETWORK,
    OVN_SERVICE_NAME,
};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Role a logical network plays for the pods attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkRole {
    /// The cluster default network
    Default,
    /// A user-defined network that is the primary network of its namespaces
    Primary,
    /// A user-defined network attached as an additional interface
    Secondary,
}

impl NetworkRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl FromStr for NetworkRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!(
                "unknown network role '{other}' (expected default, primary or secondary)"
            )),
        }
    }
}

impl fmt::Display for NetworkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical network and the scoping rules derived from its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkInfo {
    name: String,
    role: NetworkRole,
    prefix: String,
}

impl NetworkInfo {
    /// The cluster default network.
    #[must_use]
    pub fn default_network() -> Self {
        Self {
            name: DEFAULT_NETWORK_NAME.to_string(),
            role: NetworkRole::Default,
            prefix: String::new(),
        }
    }

    /// A user-defined network.
    ///
    /// Passing the default network name or the `Default` role yields the
    /// default network, so there is exactly one way to spell it.
    #[must_use]
    pub fn user_defined(name: &str, role: NetworkRole) -> Self {
        if name == DEFAULT_NETWORK_NAME || role == NetworkRole::Default {
            return Self::default_network();
        }
        Self {
            name: name.to_string(),
            role,
            prefix: format!("{}_", name.replace(['-', '/'], ".")),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn role(&self) -> NetworkRole {
        self.role
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.role == NetworkRole::Default
    }

    /// Project a network-independent object name onto this network. The
    /// default network uses names unchanged.
    #[must_use]
    pub fn scoped_name(&self, base: &str) -> String {
        format!("{}{base}", self.prefix)
    }

    /// Network tags carried by every row this controller owns.
    #[must_use]
    pub fn external_ids(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (EXTERNAL_ID_NETWORK.to_string(), self.name.clone()),
            (EXTERNAL_ID_ROLE.to_string(), self.role.as_str().to_string()),
        ])
    }

    /// Whether a row with these external IDs belongs to this network.
    ///
    /// Rows written before network tagging existed carry no network tag; they
    /// belong to the default network.
    #[must_use]
    pub fn owns_external_ids(&self, external_ids: &BTreeMap<String, String>) -> bool {
        match external_ids.get(EXTERNAL_ID_NETWORK) {
            Some(network) => network == &self.name,
            None => self.is_default(),
        }
    }

    /// Whether an EndpointSlice carries the backends of `service_name` on this network.
    ///
    /// The default network reads the slices maintained by Kubernetes. A
    /// user-defined network reads only the slices mirrored onto it.
    #[must_use]
    pub fn selects_endpoint_slice(&self, slice: &EndpointSlice, service_name: &str) -> bool {
        let labels = slice.labels();
        if self.is_default() {
            labels.get(K8S_SERVICE_NAME).map(String::as_str) == Some(service_name)
                && !labels.contains_key(OVN_ENDPOINTSLICE_NETWORK)
        } else {
            labels.get(OVN_SERVICE_NAME).map(String::as_str) == Some(service_name)
                && labels.get(OVN_ENDPOINTSLICE_NETWORK).map(String::as_str)
                    == Some(self.name.as_str())
        }
    }
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
#[path = "network_tests.rs"]
mod network_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Small value types shared by the tracker, the builder and the reconciler.

use crate::constants::{NODE_IPV4_TEMPLATE_PREFIX, NODE_IPV6_TEMPLATE_PREFIX};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Identity of one reconciliation unit: a namespaced Service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub namespace: String,
    pub name: String,
}

impl ServiceKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse the `<namespace>/<name>` form used by the `k8s.ovn.org/owner` external ID.
    ///
    /// # Returns
    /// `None` unless the value has exactly one `/` with non-empty parts on both sides
    #[must_use]
    pub fn from_owner(owner: &str) -> Option<Self> {
        let (namespace, name) = owner.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

impl AddressFamily {
    #[must_use]
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::IPv4,
            IpAddr::V6(_) => Self::IPv6,
        }
    }

    /// Spelling used inside load balancer names (`IPv4`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IPv4 => "IPv4",
            Self::IPv6 => "IPv6",
        }
    }

    /// Value of the `address-family` load balancer option (`ipv4`).
    #[must_use]
    pub fn option_value(self) -> &'static str {
        match self {
            Self::IPv4 => "ipv4",
            Self::IPv6 => "ipv6",
        }
    }

    /// Prefix of the per-chassis node address template variables.
    #[must_use]
    pub fn template_prefix(self) -> &'static str {
        match self {
            Self::IPv4 => NODE_IPV4_TEMPLATE_PREFIX,
            Self::IPv6 => NODE_IPV6_TEMPLATE_PREFIX,
        }
    }

    /// Parse the Kubernetes `ipFamilies` / EndpointSlice `addressType` spelling.
    #[must_use]
    pub fn from_k8s(value: &str) -> Option<Self> {
        match value {
            "IPv4" => Some(Self::IPv4),
            "IPv6" => Some(Self::IPv6),
            _ => None,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol of a Service port.
///
/// Serializes as the northbound `protocol` column (`tcp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Kubernetes spelling, also used inside load balancer names (`TCP`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Sctp => "SCTP",
        }
    }

    /// Parse a Kubernetes protocol; an unset protocol means TCP.
    #[must_use]
    pub fn from_k8s(value: Option<&str>) -> Option<Self> {
        match value.unwrap_or("TCP") {
            "TCP" => Some(Self::Tcp),
            "UDP" => Some(Self::Udp),
            "SCTP" => Some(Self::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

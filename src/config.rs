// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command line and environment configuration.
//!
//! [`Cli`] is what the user typed; [`ControllerConfig`] is the validated form
//! the controller runs with. Every flag can also be set through the
//! environment variable named next to it.

use crate::constants::{
    DEFAULT_METRICS_BIND_ADDRESS, DEFAULT_NETWORK_NAME, DEFAULT_V4_MASQUERADE_IP,
    DEFAULT_V6_MASQUERADE_IP, DEFAULT_WORKERS, DEFAULT_ZONE,
};
use crate::network::{NetworkInfo, NetworkRole};
use crate::reconcilers::desired_state::LbSettings;
use crate::types::AddressFamily;
use clap::Parser;
use ipnetwork::{IpNetwork, IpNetworkError};
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// Invalid configuration. Reported once at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid cluster subnet '{value}': {reason}")]
    InvalidSubnet { value: String, reason: String },

    #[error("at least one cluster subnet is required")]
    NoClusterSubnets,

    #[error("invalid network role: {0}")]
    InvalidNetworkRole(String),

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("{flag} must be an {family} address, got {address}")]
    WrongMasqueradeFamily {
        flag: &'static str,
        family: AddressFamily,
        address: IpAddr,
    },
}

/// A cluster subnet in `network/prefix` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterSubnet(pub IpNetwork);

impl ClusterSubnet {
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.0.ip())
    }
}

impl FromStr for ClusterSubnet {
    type Err = ConfigError;

    /// The prefix length is required and must be written in plain decimal;
    /// the address must be the network address itself.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        let invalid = |reason: String| ConfigError::InvalidSubnet {
            value: s.to_string(),
            reason,
        };

        let network: IpNetwork = value
            .parse()
            .map_err(|e: IpNetworkError| invalid(e.to_string()))?;

        let prefix = value.rsplit_once('/').map(|(_, prefix)| prefix);
        if prefix != Some(network.prefix().to_string().as_str()) {
            return Err(invalid(format!(
                "prefix length must be written as /{}",
                network.prefix()
            )));
        }
        if network.ip() != network.network() {
            return Err(invalid(format!(
                "host bits are set; the network is {}/{}",
                network.network(),
                network.prefix()
            )));
        }

        Ok(Self(network))
    }
}

impl fmt::Display for ClusterSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Synchronize Kubernetes Services into OVN northbound load balancers.
#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Comma-separated pod subnets; their families are the enabled address families
    #[arg(long, env = "OVN_CLUSTER_SUBNETS", value_delimiter = ',', required = true)]
    pub cluster_subnets: Vec<String>,

    /// Zone whose nodes this controller programs
    #[arg(long, env = "OVN_ZONE", default_value = DEFAULT_ZONE)]
    pub zone: String,

    /// Logical network to reconcile
    #[arg(long, env = "OVN_NETWORK_NAME", default_value = DEFAULT_NETWORK_NAME)]
    pub network_name: String,

    /// Role of the network: default, primary or secondary
    #[arg(long, env = "OVN_NETWORK_ROLE", default_value = "default")]
    pub network_role: String,

    /// Maximum number of Services synced concurrently
    #[arg(long, env = "OVN_SERVICES_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: u16,

    /// Listen address for /metrics and /healthz
    #[arg(long, env = "OVN_METRICS_BIND_ADDRESS", default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    pub metrics_bind_address: SocketAddr,

    /// Emit an event instead of rejecting traffic to a VIP without endpoints
    #[arg(long, env = "OVN_EMPTY_LB_EVENTS")]
    pub empty_lb_events: bool,

    /// Hairpin SNAT address for IPv4
    #[arg(long, env = "OVN_V4_MASQUERADE_IP", default_value = DEFAULT_V4_MASQUERADE_IP)]
    pub v4_masquerade_ip: IpAddr,

    /// Hairpin SNAT address for IPv6
    #[arg(long, env = "OVN_V6_MASQUERADE_IP", default_value = DEFAULT_V6_MASQUERADE_IP)]
    pub v6_masquerade_ip: IpAddr,

    /// Write to an in-memory northbound database instead of a real one
    #[arg(long, env = "OVN_DRY_RUN")]
    pub dry_run: bool,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub cluster_subnets: Vec<ClusterSubnet>,
    pub families: BTreeSet<AddressFamily>,
    pub zone: String,
    pub network: NetworkInfo,
    pub workers: usize,
    pub metrics_bind_address: SocketAddr,
    pub lb_settings: LbSettings,
    pub dry_run: bool,
}

impl Cli {
    /// Check the parsed flags and derive the typed configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError`] describing the first invalid flag.
    pub fn validate(&self) -> Result<ControllerConfig, ConfigError> {
        let cluster_subnets = self
            .cluster_subnets
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<ClusterSubnet>())
            .collect::<Result<Vec<_>, _>>()?;
        if cluster_subnets.is_empty() {
            return Err(ConfigError::NoClusterSubnets);
        }
        let families = cluster_subnets.iter().map(ClusterSubnet::family).collect();

        let role: NetworkRole = self
            .network_role
            .parse()
            .map_err(ConfigError::InvalidNetworkRole)?;
        let network = NetworkInfo::user_defined(&self.network_name, role);

        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        for (flag, family, address) in [
            ("--v4-masquerade-ip", AddressFamily::IPv4, self.v4_masquerade_ip),
            ("--v6-masquerade-ip", AddressFamily::IPv6, self.v6_masquerade_ip),
        ] {
            if AddressFamily::of(&address) != family {
                return Err(ConfigError::WrongMasqueradeFamily {
                    flag,
                    family,
                    address,
                });
            }
        }

        Ok(ControllerConfig {
            cluster_subnets,
            families,
            zone: self.zone.clone(),
            network,
            workers: usize::from(self.workers),
            metrics_bind_address: self.metrics_bind_address,
            lb_settings: LbSettings {
                empty_lb_events: self.empty_lb_events,
                hairpin_snat_ips: format!("{} {}", self.v4_masquerade_ip, self.v6_masquerade_ip),
            },
            dry_run: self.dry_run,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;

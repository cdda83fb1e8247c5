// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for Service synchronization.
//!
//! Errors fall into four classes, and each class is handled differently by the
//! controller:
//!
//! - [`InputError`] - malformed Service or EndpointSlice data. Never retried
//!   blindly; surfaced as a Warning Event on the Service.
//! - [`TopologyError`] - one node is missing required annotations. The node is
//!   skipped; the rest of the cluster keeps reconciling.
//! - [`BackendError`] - northbound transaction or connection failure. Requeued
//!   with exponential backoff until the retry ceiling marks the Service stalled.
//! - [`BootstrapError`] - a required global northbound row is absent. The
//!   controller refuses to make progress until it appears.

use thiserror::Error;

/// Malformed or unsupported Service / EndpointSlice input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// The Service uses an address family the cluster has no subnet for
    #[error("Service {service} uses {family} but no {family} cluster subnet is configured")]
    UnsupportedAddressFamily {
        /// `<namespace>/<name>` of the Service
        service: String,
        /// `IPv4` or `IPv6`
        family: String,
    },

    /// An address on the Service does not parse as an IP
    #[error("Service {service} has invalid address '{address}' in {field}")]
    InvalidServiceAddress {
        /// `<namespace>/<name>` of the Service
        service: String,
        /// Field the address came from (e.g. `spec.clusterIPs`)
        field: String,
        /// The offending value
        address: String,
    },

    /// A Service port uses a protocol that has no load balancer equivalent
    #[error("Service {service} port '{port}' uses unsupported protocol '{protocol}'")]
    UnsupportedProtocol {
        /// `<namespace>/<name>` of the Service
        service: String,
        /// Port name or number
        port: String,
        /// The offending protocol
        protocol: String,
    },

    /// A Service port number is outside the valid range
    #[error("Service {service} has invalid port {port}")]
    InvalidPort {
        /// `<namespace>/<name>` of the Service
        service: String,
        /// The offending port number
        port: i32,
    },

    /// An EndpointSlice could not be interpreted
    #[error("EndpointSlice {slice} of Service {service} is malformed: {reason}")]
    MalformedEndpointSlice {
        /// `<namespace>/<name>` of the Service
        service: String,
        /// Name of the EndpointSlice
        slice: String,
        /// What is wrong with it
        reason: String,
    },
}

/// A node cannot be placed into the topology.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The node has no chassis identifier yet
    #[error("Node {node} has no chassis ID annotation")]
    MissingChassisId {
        /// Node name
        node: String,
    },

    /// An OVN annotation on the node does not parse
    #[error("Node {node} has malformed annotation {annotation}: {reason}")]
    MalformedAnnotation {
        /// Node name
        node: String,
        /// Annotation key
        annotation: String,
        /// Parse failure
        reason: String,
    },

    /// Another tracked node already uses this chassis identifier
    #[error("Node {node} reuses chassis {chassis} already owned by node {owner}")]
    DuplicateChassisId {
        /// Node that was rejected
        node: String,
        /// Chassis identifier in conflict
        chassis: String,
        /// Node that already owns the chassis
        owner: String,
    },
}

/// Northbound database failures. All of them are transient from the
/// controller's point of view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The transaction was rejected and nothing was applied
    #[error("Northbound transaction of {operations} operation(s) failed: {reason}")]
    TransactionFailed {
        /// Number of operations in the rejected transaction
        operations: usize,
        /// Reason reported by the database
        reason: String,
    },

    /// The database could not be reached
    #[error("Northbound database unavailable: {reason}")]
    Unavailable {
        /// Connection failure detail
        reason: String,
    },
}

/// Required global state is missing from the northbound database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// A per-network load balancer group has not been created
    #[error("Load balancer group {group} for network {network} does not exist")]
    MissingLoadBalancerGroup {
        /// Group name, already network-scoped
        group: String,
        /// Network the group belongs to
        network: String,
    },
}

/// Error returned by a single Service sync.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Service or EndpointSlice data is invalid
    #[error(transparent)]
    Input(#[from] InputError),

    /// Node data is invalid
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Northbound transaction failed
    #[error(transparent)]
    TransientBackend(#[from] BackendError),

    /// Northbound bootstrap state is missing
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

impl SyncError {
    /// Returns true if retrying the same sync later may succeed without the
    /// input changing.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientBackend(_) | Self::Bootstrap(_) => true,
            Self::Input(_) | Self::Topology(_) => false,
        }
    }

    /// Stable CamelCase reason used for Events and metric labels.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Input(InputError::UnsupportedAddressFamily { .. }) => "UnsupportedAddressFamily",
            Self::Input(InputError::InvalidServiceAddress { .. }) => "InvalidServiceAddress",
            Self::Input(InputError::UnsupportedProtocol { .. }) => "UnsupportedProtocol",
            Self::Input(InputError::InvalidPort { .. }) => "InvalidPort",
            Self::Input(InputError::MalformedEndpointSlice { .. }) => "MalformedEndpointSlice",

            Self::Topology(TopologyError::MissingChassisId { .. }) => "MissingChassisId",
            Self::Topology(TopologyError::MalformedAnnotation { .. }) => "MalformedNodeAnnotation",
            Self::Topology(TopologyError::DuplicateChassisId { .. }) => "DuplicateChassisId",

            Self::TransientBackend(BackendError::TransactionFailed { .. }) => "TransactionFailed",
            Self::TransientBackend(BackendError::Unavailable { .. }) => "NorthboundUnavailable",

            Self::Bootstrap(BootstrapError::MissingLoadBalancerGroup { .. }) => {
                "MissingLoadBalancerGroup"
            }
        }
    }
}

#[cfg(test)]
#[path = "sync_errors_tests.rs"]
mod sync_errors_tests;

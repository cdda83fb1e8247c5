// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Label, annotation and external-ID keys shared across the controller.
//!
//! Everything here is matched bit-for-bit by other OVN-Kubernetes components,
//! so these strings must never change.

// ============================================================================
// Kubernetes Standard Labels
// ============================================================================

/// Label carried by every EndpointSlice that belongs to a Service
pub const K8S_SERVICE_NAME: &str = "kubernetes.io/service-name";

// ============================================================================
// Mirrored EndpointSlice Labels
// ============================================================================

/// Service name label on EndpointSlices mirrored onto a user-defined network
pub const OVN_SERVICE_NAME: &str = "k8s.ovn.org/service-name";

/// Network name label on mirrored EndpointSlices
pub const OVN_ENDPOINTSLICE_NETWORK: &str = "k8s.ovn.org/endpointslice-network";

// ============================================================================
// Node Annotations
// ============================================================================

/// Chassis identifier of the node's forwarding agent
pub const NODE_CHASSIS_ID_ANNOTATION: &str = "k8s.ovn.org/node-chassis-id";

/// Interconnect zone the node belongs to
pub const NODE_ZONE_NAME_ANNOTATION: &str = "k8s.ovn.org/zone-name";

/// JSON list of host CIDRs (e.g. `["10.0.0.1/24"]`)
pub const NODE_HOST_CIDRS_ANNOTATION: &str = "k8s.ovn.org/host-cidrs";

/// JSON gateway configuration, keyed by network (`default`)
pub const NODE_L3_GATEWAY_CONFIG_ANNOTATION: &str = "k8s.ovn.org/l3-gateway-config";

// ============================================================================
// Northbound External IDs
// ============================================================================

/// Kind of Kubernetes object that owns a northbound row
pub const EXTERNAL_ID_KIND: &str = "k8s.ovn.org/kind";

/// `<namespace>/<name>` of the owning object
pub const EXTERNAL_ID_OWNER: &str = "k8s.ovn.org/owner";

/// Logical network a row belongs to
pub const EXTERNAL_ID_NETWORK: &str = "k8s.ovn.org/network";

/// Role of that logical network (`default`, `primary`, `secondary`)
pub const EXTERNAL_ID_ROLE: &str = "k8s.ovn.org/role";

/// `k8s.ovn.org/kind` value for Service load balancers
pub const KIND_SERVICE: &str = "Service";

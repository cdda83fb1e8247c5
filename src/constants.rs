// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the services controller.
//!
//! This module contains the numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Load Balancer Groups
// ============================================================================

/// Group attached to every node switch and gateway router
pub const CLUSTER_LB_GROUP_NAME: &str = "clusterLBGroup";

/// Group attached to every node switch
pub const CLUSTER_SWITCH_LB_GROUP_NAME: &str = "clusterSwitchLBGroup";

/// Group attached to every gateway router
pub const CLUSTER_ROUTER_LB_GROUP_NAME: &str = "clusterRouterLBGroup";

// ============================================================================
// Naming
// ============================================================================

/// Prefix of every Service load balancer name
pub const SERVICE_LB_PREFIX: &str = "Service_";

/// Prefix of gateway router names
pub const GATEWAY_ROUTER_PREFIX: &str = "GR_";

/// Template variable prefix for IPv4 node addresses
pub const NODE_IPV4_TEMPLATE_PREFIX: &str = "NODEIP_IPv4_";

/// Template variable prefix for IPv6 node addresses
pub const NODE_IPV6_TEMPLATE_PREFIX: &str = "NODEIP_IPv6_";

/// Common prefix of all node address template variables
pub const NODE_TEMPLATE_PREFIX: &str = "NODEIP_";

/// Marker that turns a template variable name into a reference
pub const TEMPLATE_REFERENCE_MARKER: char = '^';

// ============================================================================
// Networks and Zones
// ============================================================================

/// Name of the cluster default network
pub const DEFAULT_NETWORK_NAME: &str = "default";

/// Zone used when a node carries no zone annotation
pub const DEFAULT_ZONE: &str = "global";

// ============================================================================
// Load Balancer Options
// ============================================================================

/// IPv4 address used to SNAT hairpin traffic
pub const DEFAULT_V4_MASQUERADE_IP: &str = "169.254.169.5";

/// IPv6 address used to SNAT hairpin traffic
pub const DEFAULT_V6_MASQUERADE_IP: &str = "fd69::5";

/// `neighbor_responder` value for Service load balancers
pub const NEIGHBOR_RESPONDER_NONE: &str = "none";

/// Session affinity timeout when a ClientIP Service sets none (3 hours)
pub const DEFAULT_AFFINITY_TIMEOUT_SECS: i32 = 10_800;

// ============================================================================
// Retry and Backoff
// ============================================================================

/// First requeue delay after a transient backend failure (500ms)
pub const BACKEND_RETRY_INITIAL_MILLIS: u64 = 500;

/// Upper bound of the requeue delay (60 seconds)
pub const BACKEND_RETRY_MAX_SECS: u64 = 60;

/// Growth factor between consecutive requeues
pub const BACKEND_RETRY_MULTIPLIER: f64 = 2.0;

/// Jitter applied to every requeue delay (±10%)
pub const BACKEND_RETRY_RANDOMIZATION: f64 = 0.1;

/// Consecutive failures after which a Service is reported as stalled
pub const BACKEND_RETRY_CEILING: u32 = 10;

// ============================================================================
// Controller Runtime
// ============================================================================

/// Default number of concurrent Service syncs
pub const DEFAULT_WORKERS: u16 = 4;

/// Seconds to wait before re-checking bootstrap groups
pub const BOOTSTRAP_RETRY_SECS: u64 = 5;

/// Tokio worker threads for the controller runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server
// ============================================================================

/// Default bind address of the metrics and health server
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Path of the Prometheus scrape endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Path of the health endpoint
pub const HEALTH_SERVER_PATH: &str = "/healthz";

// ============================================================================
// Events
// ============================================================================

/// Component name reported on Kubernetes Events
pub const EVENT_REPORTING_COMPONENT: &str = "ovn-services-controller";

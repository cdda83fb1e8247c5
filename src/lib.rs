// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # OVN Services Controller
//!
//! Keeps the OVN northbound database's load balancers in line with the
//! Kubernetes Services, EndpointSlices and Nodes of one logical network.
//!
//! ## Overview
//!
//! - Every Service gets one cluster-wide load balancer per protocol, attached
//!   to the network's cluster load balancer group
//! - NodePort Services get node template load balancers whose VIPs reference
//!   per-chassis template variables, so VIP counts do not grow with node count
//! - Nodes are tracked per zone; any change to a node resyncs every Service
//!
//! ## Modules
//!
//! - [`node_tracker`] - Zone node registry built from Node annotations
//! - [`reconcilers`] - Desired state, diff and the per-Service sync
//! - [`naming`] - Names of every northbound row the controller owns
//! - [`network`] - Default and user-defined network scoping
//! - [`northbound`] - Northbound row model and the database client trait
//! - [`context`] - Reflector stores and the shared controller context
//! - [`config`] - Command line and environment configuration
//! - [`health`] - `/metrics` and `/healthz`
//!
//! ## Example
//!
//! ```rust,no_run
//! use ovn_services_controller::naming::cluster_lb_name;
//! use ovn_services_controller::network::NetworkInfo;
//! use ovn_services_controller::types::{Protocol, ServiceKey};
//!
//! let name = cluster_lb_name(
//!     &NetworkInfo::default_network(),
//!     &ServiceKey::new("testns", "foo"),
//!     Protocol::Tcp,
//! );
//! assert_eq!(name, "Service_testns/foo_TCP_cluster");
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod events;
pub mod health;
pub mod labels;
pub mod metrics;
pub mod naming;
pub mod network;
pub mod node_tracker;
pub mod northbound;
pub mod reconcilers;
pub mod sync_errors;
pub mod types;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Service reconciliation.
//!
//! # Reconciliation Architecture
//!
//! 1. **Validate** - [`service_input`] turns a Service and its EndpointSlices
//!    into typed inputs, rejecting what cannot be programmed
//! 2. **Build** - [`desired_state`] computes every load balancer, group
//!    membership and chassis template variable the Service needs
//! 3. **Diff** - [`diff`] compares that with the rows the Service owns
//! 4. **Commit** - [`services`] submits the operations as one transaction
//!
//! Failures are retried per Service with the backoff in [`retry`].
//!
//! # Example
//!
//! ```rust,no_run
//! use ovn_services_controller::reconcilers::ServiceController;
//! use ovn_services_controller::types::ServiceKey;
//!
//! async fn sync(controller: &ServiceController) {
//!     let key = ServiceKey::new("testns", "foo");
//!     match controller.sync_service(&key).await {
//!         Ok(outcome) => println!("{} operation(s)", outcome.operations),
//!         Err(e) => eprintln!("sync failed: {e}"),
//!     }
//! }
//! ```

pub mod desired_state;
pub mod diff;
pub mod retry;
pub mod service_input;
pub mod services;

pub use desired_state::{DesiredState, DesiredStateBuilder, LbSettings};
pub use diff::compute_operations;
pub use retry::{backend_backoff, RetryDecision, RetryTracker};
pub use services::{ServiceController, SyncOutcome};

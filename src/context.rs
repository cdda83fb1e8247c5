// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context with reflector stores.
//!
//! The controller never queries the API server during a sync. Services,
//! EndpointSlices and Nodes are mirrored into reflector stores, and the sync
//! logic reads point-in-time snapshots from them through [`ObjectStore`].

use crate::health::HealthState;
use crate::labels::{K8S_SERVICE_NAME, OVN_SERVICE_NAME};
use crate::reconcilers::retry::RetryTracker;
use crate::reconcilers::ServiceController;
use crate::types::ServiceKey;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, ResourceExt};
use std::sync::Arc;

/// Read access to the Kubernetes objects a sync consumes.
///
/// Every method returns a snapshot; objects may change right after they are
/// returned.
pub trait ObjectStore: Send + Sync {
    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>>;

    /// Keys of every Service in the store.
    fn list_services(&self) -> Vec<ServiceKey>;

    /// EndpointSlices in `namespace` labelled with `service_name`, through
    /// either the Kubernetes or the mirrored service-name label.
    fn list_endpoint_slices(&self, namespace: &str, service_name: &str) -> Vec<Arc<EndpointSlice>>;

    fn list_nodes(&self) -> Vec<Arc<Node>>;

    fn get_node(&self, name: &str) -> Option<Arc<Node>>;
}

/// Collection of the reflector stores the controller reads from.
///
/// Each store is populated by a dedicated reflector task and provides
/// in-memory access to resources without API calls.
#[derive(Clone)]
pub struct Stores {
    pub services: Store<Service>,
    pub endpoint_slices: Store<EndpointSlice>,
    pub nodes: Store<Node>,
}

impl ObjectStore for Stores {
    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services
            .get(&ObjectRef::<Service>::new(name).within(namespace))
    }

    fn list_services(&self) -> Vec<ServiceKey> {
        let mut keys: Vec<ServiceKey> = self
            .services
            .state()
            .iter()
            .map(|svc| ServiceKey::new(svc.namespace().unwrap_or_default(), svc.name_any()))
            .collect();
        keys.sort();
        keys
    }

    fn list_endpoint_slices(&self, namespace: &str, service_name: &str) -> Vec<Arc<EndpointSlice>> {
        self.endpoint_slices
            .state()
            .into_iter()
            .filter(|slice| {
                let labels = slice.labels();
                slice.namespace().as_deref() == Some(namespace)
                    && [K8S_SERVICE_NAME, OVN_SERVICE_NAME]
                        .iter()
                        .any(|label| labels.get(*label).map(String::as_str) == Some(service_name))
            })
            .collect()
    }

    fn list_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.state()
    }

    fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(&ObjectRef::<Node>::new(name))
    }
}

/// Shared context passed to the Service controller's reconcile and error
/// policy functions.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client, used to publish Events
    pub client: Client,

    /// Reflector stores for Services, EndpointSlices and Nodes
    pub stores: Stores,

    /// The reconciler for one network
    pub controller: Arc<ServiceController>,

    /// Consecutive failure counts per Service
    pub retries: Arc<RetryTracker>,

    /// Bootstrap and stall state served on `/healthz`
    pub health: Arc<HealthState>,
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;

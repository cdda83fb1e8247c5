// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Service reconciliation for one logical network.
//!
//! A sync reads a consistent snapshot of its inputs, builds the desired rows,
//! diffs them against the northbound rows this Service owns and commits the
//! difference in a single transaction:
//!
//! 1. Service and EndpointSlices from the object store
//! 2. Node snapshot from the topology tracker
//! 3. Desired state from the builder
//! 4. Current rows from the northbound database
//! 5. One atomic transaction, skipped when there is nothing to change
//!
//! Node changes never touch the database directly. They update the tracker and
//! request a full resync, so node-add and node-remove share the same code path.

use crate::context::ObjectStore;
use crate::metrics;
use crate::naming::{lb_group_name, LbGroup};
use crate::network::NetworkInfo;
use crate::node_tracker::{NodeInfo, NodeTopologyTracker, ResyncRequest};
use crate::northbound::{NorthboundClient, StateFilter};
use crate::reconcilers::desired_state::DesiredStateBuilder;
use crate::reconcilers::diff::compute_operations;
use crate::sync_errors::{BackendError, BootstrapError, SyncError};
use crate::types::ServiceKey;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

/// Result of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Operations committed; zero when the database was already in sync
    pub operations: usize,
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Reconciler for the Services of one network.
pub struct ServiceController {
    store: Arc<dyn ObjectStore>,
    northbound: Arc<dyn NorthboundClient>,
    tracker: Arc<NodeTopologyTracker>,
    builder: DesiredStateBuilder,
    in_flight: Mutex<HashMap<ServiceKey, KeyLock>>,
    resync: Option<UnboundedSender<ServiceKey>>,
}

impl ServiceController {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        northbound: Arc<dyn NorthboundClient>,
        tracker: Arc<NodeTopologyTracker>,
        builder: DesiredStateBuilder,
    ) -> Self {
        Self {
            store,
            northbound,
            tracker,
            builder,
            in_flight: Mutex::new(HashMap::new()),
            resync: None,
        }
    }

    /// Hand resyncs of existing Services to the work queue instead of running
    /// them inline.
    #[must_use]
    pub fn with_resync_queue(mut self, queue: UnboundedSender<ServiceKey>) -> Self {
        self.resync = Some(queue);
        self
    }

    #[must_use]
    pub fn network(&self) -> &NetworkInfo {
        self.builder.network()
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<ServiceKey, KeyLock>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_lock(&self, key: &ServiceKey) -> KeyLock {
        self.in_flight().entry(key.clone()).or_default().clone()
    }

    fn release_key_lock(&self, key: &ServiceKey, lock: KeyLock) {
        let mut in_flight = self.in_flight();
        // Only the map and this caller hold it: nobody is waiting
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(key);
        }
    }

    /// Bring the northbound rows of one Service in line with its current inputs.
    ///
    /// A Service that no longer exists, is headless, or is an ExternalName
    /// Service ends up with no load balancers. Running a sync twice with
    /// unchanged inputs commits nothing the second time.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Input`] if the Service or its EndpointSlices are invalid
    /// - [`SyncError::TransientBackend`] if reading or writing the database fails
    /// - [`SyncError::Bootstrap`] if the network's load balancer groups are missing
    #[instrument(skip(self, key), fields(service = %key, network = %self.network()))]
    pub async fn sync_service(&self, key: &ServiceKey) -> Result<SyncOutcome, SyncError> {
        let lock = self.key_lock(key);
        let guard = lock.lock().await;

        let start = Instant::now();
        let result = self.sync_locked(key).await;
        match &result {
            Ok(_) => metrics::record_sync_success(start.elapsed()),
            Err(e) => metrics::record_sync_error(e.status_reason(), start.elapsed()),
        }

        drop(guard);
        self.release_key_lock(key, lock);
        result
    }

    async fn sync_locked(&self, key: &ServiceKey) -> Result<SyncOutcome, SyncError> {
        let network = self.builder.network();

        let service = self.store.get_service(&key.namespace, &key.name);
        let slices: Vec<_> = match service {
            Some(_) => self
                .store
                .list_endpoint_slices(&key.namespace, &key.name)
                .into_iter()
                .filter(|slice| network.selects_endpoint_slice(slice, &key.name))
                .collect(),
            None => Vec::new(),
        };
        let nodes = self.tracker.snapshot();

        let desired = self
            .builder
            .build(key, service.as_deref(), &slices, &nodes)?;
        debug!(
            load_balancers = desired.load_balancers.len(),
            slices = slices.len(),
            nodes = nodes.len(),
            "Built desired state"
        );

        let filter = StateFilter {
            network: network.clone(),
            owner: Some(key.clone()),
        };
        let current = self.northbound.current_state(&filter).await?;

        let operations = compute_operations(network, key, &desired, &current)?;
        if operations.is_empty() {
            debug!("Service already in sync");
            return Ok(SyncOutcome { operations: 0 });
        }

        let count = operations.len();
        self.northbound.transact(operations.clone()).await?;
        metrics::record_operations(&operations);

        info!(ops = count, exists = service.is_some(), "Synced service");
        Ok(SyncOutcome { operations: count })
    }

    /// Resync every Service named by `request`.
    ///
    /// [`ResyncRequest::All`] covers the Services in the object store plus
    /// every owner found on this network's load balancers, so load balancers
    /// of deleted Services are removed too. Keys that still exist go to the
    /// work queue when one is attached. Everything else syncs inline; failures
    /// are logged and left for the next resync.
    ///
    /// # Returns
    /// The keys that were resynced or queued
    ///
    /// # Errors
    /// Returns [`BackendError`] if the owners cannot be read from the database.
    pub async fn request_full_sync(
        &self,
        request: ResyncRequest,
    ) -> Result<BTreeSet<ServiceKey>, BackendError> {
        let keys = match request {
            ResyncRequest::Services(keys) => keys,
            ResyncRequest::All => {
                let mut keys: BTreeSet<ServiceKey> =
                    self.store.list_services().into_iter().collect();
                let filter = StateFilter {
                    network: self.network().clone(),
                    owner: None,
                };
                let state = self.northbound.current_state(&filter).await?;
                keys.extend(state.load_balancers.values().filter_map(|lb| lb.owner()));
                keys
            }
        };

        info!(services = keys.len(), network = %self.network(), "Requesting resync");

        for key in &keys {
            let exists = self.store.get_service(&key.namespace, &key.name).is_some();
            if exists {
                if let Some(queue) = &self.resync {
                    if queue.send(key.clone()).is_ok() {
                        continue;
                    }
                }
            }
            if let Err(e) = self.sync_service(key).await {
                warn!(service = %key, error = %e, "Resync failed");
            }
        }

        Ok(keys)
    }

    /// Check that the network's load balancer groups exist.
    ///
    /// # Errors
    /// Returns [`SyncError::Bootstrap`] naming the first missing group, or
    /// [`SyncError::TransientBackend`] if the database cannot be read.
    pub async fn verify_bootstrap(&self) -> Result<(), SyncError> {
        let network = self.network();
        let filter = StateFilter {
            network: network.clone(),
            owner: None,
        };
        let state = self.northbound.current_state(&filter).await?;

        for group in LbGroup::ALL {
            let name = lb_group_name(network, group);
            if !state.groups.contains_key(&name) {
                return Err(BootstrapError::MissingLoadBalancerGroup {
                    group: name,
                    network: network.name().to_string(),
                }
                .into());
            }
        }

        info!(network = %network, "Load balancer groups present");
        Ok(())
    }

    /// Re-read one node from the object store into the tracker.
    ///
    /// A node that is gone, or whose annotations no longer parse, stops being
    /// tracked.
    ///
    /// # Returns
    /// The resync the change calls for, if any
    pub fn refresh_node(&self, name: &str) -> Option<ResyncRequest> {
        let Some(node) = self.store.get_node(name) else {
            return self.tracker.remove_node(name);
        };

        let info = match NodeInfo::from_node(&node, self.network()) {
            Ok(info) => info,
            Err(e) => {
                warn!(node = %name, error = %e, "Skipping node");
                metrics::record_error(SyncError::from(e).status_reason());
                return self.tracker.remove_node(name);
            }
        };

        match self.tracker.add_or_update_node(info) {
            Ok(request) => request,
            Err(e) => {
                warn!(node = %name, error = %e, "Skipping node");
                metrics::record_error(SyncError::from(e).status_reason());
                None
            }
        }
    }

    /// Reconcile the tracker with every node in the object store.
    ///
    /// # Returns
    /// `Some(ResyncRequest::All)` if any tracked node was added, changed or removed
    pub fn refresh_all_nodes(&self) -> Option<ResyncRequest> {
        let mut changed = false;

        let present: BTreeSet<String> = self
            .store
            .list_nodes()
            .iter()
            .filter_map(|node| node.metadata.name.clone())
            .collect();

        for name in self.tracker.get_zone_nodes() {
            if !present.contains(&name) {
                changed |= self.tracker.remove_node(&name).is_some();
            }
        }
        for name in &present {
            changed |= self.refresh_node(name).is_some();
        }

        changed.then_some(ResyncRequest::All)
    }
}

#[cfg(test)]
#[path = "services_tests.rs"]
mod services_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `services.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::northbound::{MemoryNorthbound, NorthboundState, Operation};
    use crate::reconcilers::desired_state::LbSettings;
    use crate::types::AddressFamily;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Node, Service, ServicePort, ServiceSpec};
    use k8s_openapi::api::discovery::v1::EndpointSlice;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::time::Duration;

    /// Object store backed by plain vectors that tests can mutate.
    #[derive(Default)]
    struct FakeStore {
        services: Mutex<Vec<Arc<Service>>>,
        nodes: Mutex<Vec<Arc<Node>>>,
    }

    impl FakeStore {
        fn add_service(&self, service: Service) {
            self.services.lock().unwrap().push(Arc::new(service));
        }

        fn remove_service(&self, name: &str) {
            self.services
                .lock()
                .unwrap()
                .retain(|s| s.metadata.name.as_deref() != Some(name));
        }

        fn set_nodes(&self, nodes: Vec<Node>) {
            *self.nodes.lock().unwrap() = nodes.into_iter().map(Arc::new).collect();
        }
    }

    impl ObjectStore for FakeStore {
        fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
            self.services
                .lock()
                .unwrap()
                .iter()
                .find(|s| {
                    s.metadata.namespace.as_deref() == Some(namespace)
                        && s.metadata.name.as_deref() == Some(name)
                })
                .cloned()
        }

        fn list_services(&self) -> Vec<ServiceKey> {
            self.services
                .lock()
                .unwrap()
                .iter()
                .map(|s| {
                    ServiceKey::new(
                        s.metadata.namespace.clone().unwrap_or_default(),
                        s.metadata.name.clone().unwrap_or_default(),
                    )
                })
                .collect()
        }

        fn list_endpoint_slices(&self, _namespace: &str, _service_name: &str) -> Vec<Arc<EndpointSlice>> {
            Vec::new()
        }

        fn list_nodes(&self) -> Vec<Arc<Node>> {
            self.nodes.lock().unwrap().clone()
        }

        fn get_node(&self, name: &str) -> Option<Arc<Node>> {
            self.nodes
                .lock()
                .unwrap()
                .iter()
                .find(|n| n.metadata.name.as_deref() == Some(name))
                .cloned()
        }
    }

    /// Backend that logs every read and write and makes both slow.
    struct SlowNorthbound {
        inner: MemoryNorthbound,
        log: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl NorthboundClient for SlowNorthbound {
        async fn current_state(&self, filter: &StateFilter) -> Result<NorthboundState, BackendError> {
            self.log.lock().unwrap().push("read");
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.current_state(filter).await
        }

        async fn transact(&self, operations: Vec<Operation>) -> Result<(), BackendError> {
            self.log.lock().unwrap().push("write");
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.transact(operations).await
        }
    }

    fn cluster_ip_service(name: &str, ip: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("testns".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                cluster_ip: Some(ip.to_string()),
                cluster_ips: Some(vec![ip.to_string()]),
                ports: Some(vec![ServicePort {
                    port: 80,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn annotated_node(name: &str, annotations: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn ready_node(name: &str, chassis: &str, cidr: &str) -> Node {
        let cidrs = format!(r#"["{cidr}"]"#);
        annotated_node(
            name,
            &[
                ("k8s.ovn.org/node-chassis-id", chassis),
                ("k8s.ovn.org/host-cidrs", cidrs.as_str()),
            ],
        )
    }

    fn controller(store: Arc<FakeStore>, db: Arc<MemoryNorthbound>) -> ServiceController {
        let network = NetworkInfo::default_network();
        ServiceController::new(
            store,
            db,
            Arc::new(NodeTopologyTracker::new("global")),
            DesiredStateBuilder::new(
                network,
                [AddressFamily::IPv4].into_iter().collect(),
                LbSettings {
                    empty_lb_events: false,
                    hairpin_snat_ips: "169.254.169.5".to_string(),
                },
            ),
        )
    }

    fn slow_setup(store: Arc<FakeStore>) -> (Arc<SlowNorthbound>, ServiceController) {
        let db = Arc::new(SlowNorthbound {
            inner: MemoryNorthbound::bootstrapped(&NetworkInfo::default_network(), &[]),
            log: Mutex::new(Vec::new()),
        });
        let ctrl = ServiceController::new(
            store,
            db.clone(),
            Arc::new(NodeTopologyTracker::new("global")),
            DesiredStateBuilder::new(
                NetworkInfo::default_network(),
                [AddressFamily::IPv4].into_iter().collect(),
                LbSettings {
                    empty_lb_events: false,
                    hairpin_snat_ips: "169.254.169.5".to_string(),
                },
            ),
        );
        (db, ctrl)
    }

    fn setup() -> (Arc<FakeStore>, Arc<MemoryNorthbound>, ServiceController) {
        let store = Arc::new(FakeStore::default());
        let db = Arc::new(MemoryNorthbound::bootstrapped(
            &NetworkInfo::default_network(),
            &["node-a"],
        ));
        let ctrl = controller(store.clone(), db.clone());
        (store, db, ctrl)
    }

    #[tokio::test]
    async fn test_concurrent_syncs_of_one_key_do_not_overlap() {
        let store = Arc::new(FakeStore::default());
        store.add_service(cluster_ip_service("foo", "192.168.1.1"));
        let (db, ctrl) = slow_setup(store);
        let key = ServiceKey::new("testns", "foo");

        let (first, second) = tokio::join!(ctrl.sync_service(&key), ctrl.sync_service(&key));

        // The second sync starts only after the first committed, so it finds
        // nothing left to do
        assert_eq!(*db.log.lock().unwrap(), vec!["read", "write", "read"]);
        let mut operations = [first.unwrap().operations, second.unwrap().operations];
        operations.sort_unstable();
        assert_eq!(operations[0], 0);
        assert!(operations[1] > 0);
        assert_eq!(db.inner.transaction_count(), 1);
        assert!(ctrl.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_syncs_of_different_keys_run_concurrently() {
        let store = Arc::new(FakeStore::default());
        store.add_service(cluster_ip_service("foo", "192.168.1.1"));
        store.add_service(cluster_ip_service("bar", "192.168.1.2"));
        let (db, ctrl) = slow_setup(store);
        let foo = ServiceKey::new("testns", "foo");
        let bar = ServiceKey::new("testns", "bar");

        let (a, b) = tokio::join!(ctrl.sync_service(&foo), ctrl.sync_service(&bar));
        a.unwrap();
        b.unwrap();

        assert_eq!(*db.log.lock().unwrap(), vec!["read", "read", "write", "write"]);
        assert_eq!(db.inner.dump().load_balancers.len(), 2);
        assert!(ctrl.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_sync_creates_then_is_idempotent() {
        let (store, db, ctrl) = setup();
        store.add_service(cluster_ip_service("foo", "192.168.1.1"));
        let key = ServiceKey::new("testns", "foo");

        let first = ctrl.sync_service(&key).await.unwrap();
        assert!(first.operations > 0);
        assert!(db
            .dump()
            .load_balancers
            .contains_key("Service_testns/foo_TCP_cluster"));

        let transactions = db.transaction_count();
        let second = ctrl.sync_service(&key).await.unwrap();
        assert_eq!(second.operations, 0);
        assert_eq!(db.transaction_count(), transactions);
    }

    #[tokio::test]
    async fn test_sync_of_deleted_service_removes_its_rows() {
        let (store, db, ctrl) = setup();
        store.add_service(cluster_ip_service("foo", "192.168.1.1"));
        let key = ServiceKey::new("testns", "foo");
        ctrl.sync_service(&key).await.unwrap();

        store.remove_service("foo");
        ctrl.sync_service(&key).await.unwrap();

        let tables = db.dump();
        assert!(tables.load_balancers.is_empty());
        assert!(tables
            .groups
            .values()
            .all(|group| group.load_balancers.is_empty()));
    }

    #[tokio::test]
    async fn test_transaction_failure_is_transient() {
        let (store, db, ctrl) = setup();
        store.add_service(cluster_ip_service("foo", "192.168.1.1"));
        db.fail_next_transaction("connection reset");

        let err = ctrl
            .sync_service(&ServiceKey::new("testns", "foo"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::TransientBackend(_)));
        assert!(err.is_transient());
        assert!(db.dump().load_balancers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_groups_fail_bootstrap() {
        let store = Arc::new(FakeStore::default());
        store.add_service(cluster_ip_service("foo", "192.168.1.1"));
        let db = Arc::new(MemoryNorthbound::new());
        let ctrl = controller(store, db.clone());

        assert!(matches!(
            ctrl.verify_bootstrap().await,
            Err(SyncError::Bootstrap(_))
        ));
        assert!(matches!(
            ctrl.sync_service(&ServiceKey::new("testns", "foo")).await,
            Err(SyncError::Bootstrap(_))
        ));
        assert_eq!(db.transaction_count(), 0);

        db.bootstrap_network(&NetworkInfo::default_network(), &[]);
        assert!(ctrl.verify_bootstrap().await.is_ok());
    }

    #[tokio::test]
    async fn test_full_sync_includes_orphaned_owners() {
        let (store, db, ctrl) = setup();
        store.add_service(cluster_ip_service("foo", "192.168.1.1"));
        store.add_service(cluster_ip_service("bar", "192.168.1.2"));
        ctrl.sync_service(&ServiceKey::new("testns", "foo")).await.unwrap();
        ctrl.sync_service(&ServiceKey::new("testns", "bar")).await.unwrap();

        // Deletion was missed while the controller was down
        store.remove_service("bar");

        let keys = ctrl.request_full_sync(ResyncRequest::All).await.unwrap();

        assert!(keys.contains(&ServiceKey::new("testns", "bar")));
        let tables = db.dump();
        assert!(tables
            .load_balancers
            .contains_key("Service_testns/foo_TCP_cluster"));
        assert!(!tables
            .load_balancers
            .contains_key("Service_testns/bar_TCP_cluster"));
    }

    #[tokio::test]
    async fn test_full_sync_queues_existing_services() {
        let (store, db, ctrl) = setup();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ctrl = ctrl.with_resync_queue(tx);
        store.add_service(cluster_ip_service("foo", "192.168.1.1"));

        ctrl.request_full_sync(ResyncRequest::All).await.unwrap();

        assert_eq!(rx.recv().await, Some(ServiceKey::new("testns", "foo")));
        assert_eq!(db.transaction_count(), 0);
    }

    #[test]
    fn test_refresh_node_tracks_and_forgets() {
        let (store, _db, ctrl) = setup();
        store.set_nodes(vec![ready_node("node-a", "chassis-a", "10.0.0.1/24")]);

        assert_eq!(ctrl.refresh_node("node-a"), Some(ResyncRequest::All));
        assert_eq!(ctrl.refresh_node("node-a"), None);
        assert_eq!(ctrl.tracker.snapshot().len(), 1);

        store.set_nodes(vec![]);
        assert_eq!(ctrl.refresh_node("node-a"), Some(ResyncRequest::All));
        assert!(ctrl.tracker.snapshot().is_empty());
    }

    #[test]
    fn test_refresh_node_drops_node_that_turns_malformed() {
        let (store, _db, ctrl) = setup();
        store.set_nodes(vec![ready_node("node-a", "chassis-a", "10.0.0.1/24")]);
        ctrl.refresh_node("node-a");

        store.set_nodes(vec![annotated_node(
            "node-a",
            &[
                ("k8s.ovn.org/node-chassis-id", "chassis-a"),
                ("k8s.ovn.org/host-cidrs", "not json"),
            ],
        )]);

        assert_eq!(ctrl.refresh_node("node-a"), Some(ResyncRequest::All));
        assert!(ctrl.tracker.snapshot().is_empty());
    }

    #[test]
    fn test_refresh_node_without_chassis_is_skipped() {
        let (store, _db, ctrl) = setup();
        store.set_nodes(vec![annotated_node("node-b", &[])]);

        assert_eq!(ctrl.refresh_node("node-b"), None);
        assert!(ctrl.tracker.snapshot().is_empty());
    }

    #[test]
    fn test_refresh_all_nodes_prunes_vanished_nodes() {
        let (store, _db, ctrl) = setup();
        store.set_nodes(vec![
            ready_node("node-a", "chassis-a", "10.0.0.1/24"),
            ready_node("node-b", "chassis-b", "10.0.0.2/24"),
        ]);
        assert_eq!(ctrl.refresh_all_nodes(), Some(ResyncRequest::All));
        assert_eq!(ctrl.tracker.snapshot().len(), 2);

        assert_eq!(ctrl.refresh_all_nodes(), None);

        store.set_nodes(vec![ready_node("node-b", "chassis-b", "10.0.0.2/24")]);
        assert_eq!(ctrl.refresh_all_nodes(), Some(ResyncRequest::All));
        assert_eq!(
            ctrl.tracker.get_zone_nodes().into_iter().collect::<Vec<_>>(),
            vec!["node-b".to_string()]
        );
    }
}

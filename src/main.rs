// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::{
    runtime::{
        controller::{self, Action},
        reflector::{self, ObjectRef},
        watcher, Controller, WatchStreamExt,
    },
    Api, Client, ResourceExt,
};
use ovn_services_controller::{
    config::Cli,
    constants::{
        BACKEND_RETRY_MAX_SECS, BACKEND_RETRY_MULTIPLIER, BACKEND_RETRY_RANDOMIZATION,
        BOOTSTRAP_RETRY_SECS, TOKIO_WORKER_THREADS,
    },
    context::{Context, Stores},
    events, health,
    health::HealthState,
    labels::{K8S_SERVICE_NAME, OVN_SERVICE_NAME},
    metrics,
    node_tracker::{NodeTopologyTracker, ResyncRequest},
    northbound::{MemoryNorthbound, NorthboundClient},
    reconcilers::{
        retry::{retry_sync_call, ExponentialBackoff},
        DesiredStateBuilder, RetryTracker, ServiceController,
    },
    sync_errors::SyncError,
    types::ServiceKey,
};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] SyncError);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("ovn-services-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

fn init_tracing() {
    // Respects RUST_LOG, defaulting to INFO; RUST_LOG_FORMAT=json switches to JSON lines
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    init_tracing();

    let config = cli.validate().context("invalid configuration")?;
    info!(
        network = %config.network,
        role = config.network.role().as_str(),
        zone = %config.zone,
        families = ?config.families,
        workers = config.workers,
        "Starting OVN services controller"
    );

    let northbound: Arc<dyn NorthboundClient> = if config.dry_run {
        warn!("Dry run: writing to an in-memory northbound database");
        Arc::new(MemoryNorthbound::bootstrapped(&config.network, &[]))
    } else {
        anyhow::bail!(
            "no northbound database client is available in this build; run with --dry-run"
        );
    };

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let retries = Arc::new(RetryTracker::default());
    let health = Arc::new(HealthState::new(retries.clone()));
    let server = tokio::spawn(health::serve(
        config.metrics_bind_address,
        health.clone(),
        wait_for_shutdown(shutdown_rx.clone()),
    ));

    let (services, services_writer) = reflector::store::<Service>();
    let (endpoint_slices, slices_writer) = reflector::store::<EndpointSlice>();
    let (nodes, nodes_writer) = reflector::store::<Node>();
    let stores = Stores {
        services,
        endpoint_slices,
        nodes,
    };

    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel::<ServiceKey>();
    let (applied_tx, applied_rx) = mpsc::unbounded_channel::<Service>();
    let service_controller = Arc::new(
        ServiceController::new(
            Arc::new(stores.clone()),
            northbound,
            Arc::new(NodeTopologyTracker::new(config.zone.clone())),
            DesiredStateBuilder::new(
                config.network.clone(),
                config.families.clone(),
                config.lb_settings.clone(),
            ),
        )
        .with_resync_queue(trigger_tx.clone()),
    );

    wait_for_bootstrap(&service_controller, &health).await?;

    // Nothing is synced before every store has its initial list
    let started = Arc::new(AtomicBool::new(false));

    tokio::spawn(run_node_reflector(
        Api::<Node>::all(client.clone()),
        nodes_writer,
        service_controller.clone(),
        started.clone(),
    ));
    tokio::spawn(run_service_reflector(
        Api::<Service>::all(client.clone()),
        services_writer,
        service_controller.clone(),
        retries.clone(),
        applied_tx,
        started.clone(),
    ));
    tokio::spawn(run_endpoint_slice_reflector(
        Api::<EndpointSlice>::all(client.clone()),
        slices_writer,
        trigger_tx.clone(),
    ));

    stores.nodes.wait_until_ready().await?;
    stores.services.wait_until_ready().await?;
    stores.endpoint_slices.wait_until_ready().await?;
    info!(
        nodes = stores.nodes.state().len(),
        services = stores.services.state().len(),
        "Stores synced"
    );

    service_controller.refresh_all_nodes();
    started.store(true, Ordering::SeqCst);
    service_controller
        .request_full_sync(ResyncRequest::All)
        .await
        .context("initial full resync")?;

    let ctx = Arc::new(Context {
        client,
        stores,
        controller: service_controller,
        retries,
        health,
    });

    run_service_controller(ctx, applied_rx, trigger_rx, config.workers, shutdown_rx).await;

    info!("Service controller drained, stopping");
    server.abort();
    Ok(())
}

/// Block until the network's load balancer groups exist.
async fn wait_for_bootstrap(controller: &ServiceController, health: &HealthState) -> Result<()> {
    let backoff = ExponentialBackoff::new(
        Duration::from_secs(BOOTSTRAP_RETRY_SECS),
        Duration::from_secs(BACKEND_RETRY_MAX_SECS),
        None,
        BACKEND_RETRY_MULTIPLIER,
        BACKEND_RETRY_RANDOMIZATION,
    );

    retry_sync_call(
        backoff,
        move || async move {
            let result = controller.verify_bootstrap().await;
            if let Err(e) = &result {
                health.mark_bootstrap_failed(e.to_string());
            }
            result
        },
        "verify load balancer groups",
    )
    .await?;

    health.mark_bootstrapped();
    Ok(())
}

/// Run the Service controller until shutdown.
///
/// The controller is the per-Service work queue: at most one sync per Service
/// is in flight and repeated triggers for a queued Service coalesce. It reads
/// Services from the shared reflector store and is fed by the Service
/// reflector task, so no second Service watch is opened.
async fn run_service_controller(
    ctx: Arc<Context>,
    applied: mpsc::UnboundedReceiver<Service>,
    triggers: mpsc::UnboundedReceiver<ServiceKey>,
    workers: usize,
    shutdown: watch::Receiver<bool>,
) {
    info!(workers = workers, "Starting Service controller");

    let applied = futures::stream::unfold(applied, |mut rx| async move {
        rx.recv()
            .await
            .map(|svc| (Ok::<_, watcher::Error>(svc), rx))
    });
    let requests = futures::stream::unfold(triggers, |mut rx| async move {
        rx.recv().await.map(|key| {
            (
                ObjectRef::<Service>::new(&key.name).within(&key.namespace),
                rx,
            )
        })
    });

    Controller::for_stream(applied, ctx.stores.services.clone())
        .with_config(
            controller::Config::default().concurrency(u16::try_from(workers).unwrap_or(u16::MAX)),
        )
        .reconcile_on(requests)
        .graceful_shutdown_on(wait_for_shutdown(shutdown))
        .run(reconcile_service, error_policy, ctx)
        .for_each(|result| {
            if let Err(e) = result {
                debug!(error = %e, "Controller event");
            }
            futures::future::ready(())
        })
        .await;
}

/// Keep the Node store current and feed the topology tracker.
async fn run_node_reflector(
    api: Api<Node>,
    writer: reflector::store::Writer<Node>,
    controller: Arc<ServiceController>,
    started: Arc<AtomicBool>,
) {
    let mut stream = pin!(reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff());

    while let Some(event) = stream.next().await {
        let request = match event {
            Ok(watcher::Event::Apply(node) | watcher::Event::Delete(node)) => {
                controller.refresh_node(&node.name_any())
            }
            Ok(watcher::Event::InitDone) => controller.refresh_all_nodes(),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Node watch error");
                None
            }
        };

        if let Some(request) = request {
            if started.load(Ordering::SeqCst) {
                if let Err(e) = controller.request_full_sync(request).await {
                    warn!(error = %e, "Full resync after node change failed");
                }
            }
        }
    }
}

/// Keep the Service store current, feed the work queue and clean up deleted
/// Services.
async fn run_service_reflector(
    api: Api<Service>,
    writer: reflector::store::Writer<Service>,
    controller: Arc<ServiceController>,
    retries: Arc<RetryTracker>,
    applied: mpsc::UnboundedSender<Service>,
    started: Arc<AtomicBool>,
) {
    let mut stream = pin!(reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff());

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(svc) | watcher::Event::InitApply(svc)) => {
                let _ = applied.send(svc);
            }
            Ok(watcher::Event::Delete(svc)) => {
                let key = service_key(&svc);
                // The work queue never sees this key again
                if retries.forget(&key) {
                    info!(service = %key, "Deleted service is no longer stalled");
                }
                metrics::set_stalled_services(retries.stalled_count());
                let controller = controller.clone();
                tokio::spawn(async move {
                    let result = retry_sync_call(
                        ovn_services_controller::reconcilers::backend_backoff(),
                        || controller.sync_service(&key),
                        "remove deleted service",
                    )
                    .await;
                    if let Err(e) = result {
                        warn!(service = %key, error = %e, "Failed to remove deleted service");
                    }
                });
            }
            // A relist may hide deletions that happened while the watch was down
            Ok(watcher::Event::InitDone) if started.load(Ordering::SeqCst) => {
                if let Err(e) = controller.request_full_sync(ResyncRequest::All).await {
                    warn!(error = %e, "Full resync after relist failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Service watch error"),
        }
    }
}

/// Keep the EndpointSlice store current and trigger the owning Service.
async fn run_endpoint_slice_reflector(
    api: Api<EndpointSlice>,
    writer: reflector::store::Writer<EndpointSlice>,
    triggers: mpsc::UnboundedSender<ServiceKey>,
) {
    let mut stream = pin!(reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff());

    while let Some(event) = stream.next().await {
        match event {
            Ok(
                watcher::Event::Apply(slice)
                | watcher::Event::InitApply(slice)
                | watcher::Event::Delete(slice),
            ) => {
                if let Some(key) = endpoint_slice_owner(&slice) {
                    let _ = triggers.send(key);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "EndpointSlice watch error"),
        }
    }
}

fn service_key(svc: &Service) -> ServiceKey {
    ServiceKey::new(svc.namespace().unwrap_or_default(), svc.name_any())
}

/// Service an EndpointSlice belongs to, through either service-name label.
fn endpoint_slice_owner(slice: &EndpointSlice) -> Option<ServiceKey> {
    let labels = slice.labels();
    let name = labels
        .get(K8S_SERVICE_NAME)
        .or_else(|| labels.get(OVN_SERVICE_NAME))?;
    Some(ServiceKey::new(slice.namespace()?, name.clone()))
}

/// Reconcile wrapper for `Service`
async fn reconcile_service(
    service: Arc<Service>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let key = service_key(&service);

    let outcome = ctx.controller.sync_service(&key).await?;

    if ctx.retries.record_success(&key) {
        info!(service = %key, "Service recovered after reaching the retry ceiling");
    }
    metrics::set_stalled_services(ctx.retries.stalled_count());
    ctx.health.mark_bootstrapped();

    debug!(service = %key, ops = outcome.operations, "Reconciled service");
    Ok(Action::await_change())
}

/// Error policy for the Service controller
fn error_policy(service: Arc<Service>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let key = service_key(&service);

    match &err.0 {
        SyncError::Input(e) => {
            warn!(service = %key, error = %e, "Service input is invalid, waiting for a change");
            ctx.retries.forget(&key);
            metrics::set_stalled_services(ctx.retries.stalled_count());
            let client = ctx.client.clone();
            let message = e.to_string();
            tokio::spawn(async move {
                events::publish_invalid_input(&client, &service, &message).await;
            });
            Action::await_change()
        }
        SyncError::Topology(e) => {
            warn!(service = %key, error = %e, "Topology error during sync");
            Action::await_change()
        }
        SyncError::TransientBackend(e) => {
            let decision = ctx.retries.record_failure(&key);
            if decision.newly_stalled {
                error!(
                    service = %key,
                    attempts = decision.attempt,
                    error = %e,
                    "Service reached the retry ceiling and is stalled"
                );
            } else {
                warn!(
                    service = %key,
                    attempt = decision.attempt,
                    retry_after = ?decision.delay,
                    error = %e,
                    "Northbound failure, will retry"
                );
            }
            metrics::set_stalled_services(ctx.retries.stalled_count());
            Action::requeue(decision.delay)
        }
        SyncError::Bootstrap(e) => {
            error!(service = %key, error = %e, "Northbound bootstrap rows missing");
            ctx.health.mark_bootstrap_failed(e.to_string());
            Action::requeue(Duration::from_secs(BACKEND_RETRY_MAX_SECS))
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP endpoints for Prometheus scraping and liveness.
//!
//! - `/metrics` serves [`crate::metrics::gather_metrics`]
//! - `/healthz` answers 200 while the controller is making progress and 503
//!   when the network's bootstrap rows are missing or a Service is stalled

use crate::constants::{HEALTH_SERVER_PATH, METRICS_SERVER_PATH};
use crate::metrics;
use crate::reconcilers::retry::RetryTracker;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Controller health as seen by `/healthz`.
#[derive(Debug)]
pub struct HealthState {
    bootstrapped: AtomicBool,
    bootstrap_error: Mutex<Option<String>>,
    retries: Arc<RetryTracker>,
}

impl HealthState {
    /// Starts unhealthy until bootstrap verification succeeds.
    #[must_use]
    pub fn new(retries: Arc<RetryTracker>) -> Self {
        Self {
            bootstrapped: AtomicBool::new(false),
            bootstrap_error: Mutex::new(None),
            retries,
        }
    }

    pub fn mark_bootstrapped(&self) {
        self.bootstrapped.store(true, Ordering::SeqCst);
        *self
            .bootstrap_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn mark_bootstrap_failed(&self, reason: impl Into<String>) {
        self.bootstrapped.store(false, Ordering::SeqCst);
        *self
            .bootstrap_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    #[must_use]
    pub fn status(&self) -> Health {
        if !self.bootstrapped.load(Ordering::SeqCst) {
            let reason = self
                .bootstrap_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .unwrap_or_else(|| "bootstrap not verified".to_string());
            return Health::Unhealthy(reason);
        }
        match self.retries.stalled_count() {
            0 => Health::Healthy,
            n => Health::Unhealthy(format!("{n} service(s) stalled")),
        }
    }
}

/// `/healthz` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy(String),
}

impl IntoResponse for Health {
    fn into_response(self) -> Response {
        match self {
            Self::Healthy => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                "Ok".to_string(),
            )
                .into_response(),
            Self::Unhealthy(reason) => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, "text/plain")],
                reason,
            )
                .into_response(),
        }
    }
}

/// Router serving `/metrics` and `/healthz`.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route(HEALTH_SERVER_PATH, get(healthz))
        .with_state(state)
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz(State(state): State<Arc<HealthState>>) -> Health {
    state.status()
}

/// Serve the router until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve<F>(addr: SocketAddr, state: Arc<HealthState>, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "Metrics and health server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod health_tests;

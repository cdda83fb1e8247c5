// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with exponential backoff for northbound failures.
//!
//! Two consumers share one backoff shape:
//!
//! - the controller's error policy, which requeues a Service after a
//!   transient failure using [`RetryTracker`] to remember how many times in a
//!   row that Service failed
//! - [`retry_sync_call`], which blocks in place (used while waiting for
//!   bootstrap rows at startup)

use crate::constants::{
    BACKEND_RETRY_CEILING, BACKEND_RETRY_INITIAL_MILLIS, BACKEND_RETRY_MAX_SECS,
    BACKEND_RETRY_MULTIPLIER, BACKEND_RETRY_RANDOMIZATION,
};
use crate::sync_errors::SyncError;
use crate::types::ServiceKey;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Doubling backoff with jitter, optionally bounded by total elapsed time.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Interval handed out by the next call to [`Self::next_backoff`]
    pub current_interval: Duration,
    pub initial_interval: Duration,
    /// Cap applied after each multiplication
    pub max_interval: Duration,
    /// `None` retries forever
    pub max_elapsed_time: Option<Duration>,
    pub multiplier: f64,
    /// Jitter as a fraction of the interval (0.1 means ±10%)
    pub randomization_factor: f64,
    start_time: Instant,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Jittered interval to wait now; `None` once the elapsed budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    /// Un-jittered interval before the `attempt`-th retry (1-based).
    #[must_use]
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Spread `interval` uniformly over ±`randomization_factor`.
    #[must_use]
    pub fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let base = interval.as_secs_f64();
        let spread = base * self.randomization_factor;
        let offset = (rand::random::<f64>() * 2.0 - 1.0) * spread;

        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

/// Backoff used for northbound failures.
///
/// # Configuration
///
/// - **Initial interval**: 500ms
/// - **Max interval**: 60 seconds
/// - **Max elapsed time**: none (the retry ceiling is counted in attempts)
/// - **Multiplier**: 2.0
/// - **Randomization**: ±10%
///
/// # Retry Schedule
///
/// 500ms, 1s, 2s, 4s, 8s, 16s, 32s, then 60s. After
/// [`BACKEND_RETRY_CEILING`] consecutive failures the Service is reported as
/// stalled but keeps being retried every 60s.
#[must_use]
pub fn backend_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(BACKEND_RETRY_INITIAL_MILLIS),
        Duration::from_secs(BACKEND_RETRY_MAX_SECS),
        None,
        BACKEND_RETRY_MULTIPLIER,
        BACKEND_RETRY_RANDOMIZATION,
    )
}

/// Requeue decision for one failed sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    /// Consecutive failures including this one
    pub attempt: u32,
    /// Delay before the next attempt
    pub delay: Duration,
    /// The Service reached the retry ceiling with this failure
    pub newly_stalled: bool,
}

/// Consecutive transient failure counts per Service.
#[derive(Debug)]
pub struct RetryTracker {
    backoff: ExponentialBackoff,
    ceiling: u32,
    failures: Mutex<HashMap<ServiceKey, u32>>,
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(backend_backoff(), BACKEND_RETRY_CEILING)
    }
}

impl RetryTracker {
    #[must_use]
    pub fn new(backoff: ExponentialBackoff, ceiling: u32) -> Self {
        Self {
            backoff,
            ceiling,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServiceKey, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a transient failure and compute when to retry.
    pub fn record_failure(&self, key: &ServiceKey) -> RetryDecision {
        let mut failures = self.lock();
        let attempt = failures.entry(key.clone()).or_insert(0);
        *attempt = attempt.saturating_add(1);
        let attempt = *attempt;

        RetryDecision {
            attempt,
            delay: self
                .backoff
                .apply_jitter(self.backoff.interval_for_attempt(attempt)),
            newly_stalled: attempt == self.ceiling,
        }
    }

    /// Forget a Service's failures after a successful sync.
    ///
    /// # Returns
    /// `true` if the Service had been stalled
    pub fn record_success(&self, key: &ServiceKey) -> bool {
        self.forget(key)
    }

    /// Drop a Service that will not be retried by the work queue again: it was
    /// deleted, or its input is invalid and it waits for the next change.
    ///
    /// # Returns
    /// `true` if the Service had been stalled
    pub fn forget(&self, key: &ServiceKey) -> bool {
        self.lock()
            .remove(key)
            .is_some_and(|attempts| attempts >= self.ceiling)
    }

    /// Number of Services currently at or past the retry ceiling.
    #[must_use]
    pub fn stalled_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|attempts| **attempts >= self.ceiling)
            .count()
    }
}

/// Retry an operation in place while it fails with a transient [`SyncError`].
///
/// # Arguments
///
/// * `backoff` - Backoff schedule; its max elapsed time bounds the retries
/// * `operation` - Async function that performs the call
/// * `operation_name` - Human-readable name for logging
///
/// # Errors
///
/// Returns the last error if it is not transient or the backoff is exhausted.
pub async fn retry_sync_call<T, F, Fut>(
    mut backoff: ExponentialBackoff,
    mut operation: F,
    operation_name: &str,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SyncError>>,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                error!(
                    operation = operation_name,
                    error = %e,
                    "Non-retryable error, failing immediately"
                );
                return Err(e);
            }
            Err(e) => {
                let Some(duration) = backoff.next_backoff() else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Backoff exhausted, giving up"
                    );
                    return Err(e);
                };
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    retry_after = ?duration,
                    error = %e,
                    "Retryable error, will retry"
                );
                tokio::time::sleep(duration).await;
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;

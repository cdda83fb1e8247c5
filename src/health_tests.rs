// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for health.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::reconcilers::retry::ExponentialBackoff;
    use crate::types::ServiceKey;
    use std::time::Duration;

    fn state(ceiling: u32) -> (Arc<RetryTracker>, HealthState) {
        let retries = Arc::new(RetryTracker::new(
            ExponentialBackoff::new(
                Duration::from_millis(1),
                Duration::from_millis(10),
                None,
                2.0,
                0.0,
            ),
            ceiling,
        ));
        (retries.clone(), HealthState::new(retries))
    }

    #[test]
    fn test_unhealthy_until_bootstrapped() {
        let (_, health) = state(3);

        assert!(matches!(health.status(), Health::Unhealthy(_)));
        health.mark_bootstrapped();
        assert_eq!(health.status(), Health::Healthy);
    }

    #[test]
    fn test_bootstrap_failure_reports_reason() {
        let (_, health) = state(3);
        health.mark_bootstrapped();

        health.mark_bootstrap_failed("group clusterLBGroup missing");

        assert_eq!(
            health.status(),
            Health::Unhealthy("group clusterLBGroup missing".to_string())
        );
    }

    #[test]
    fn test_stalled_service_is_unhealthy_until_success() {
        let (retries, health) = state(2);
        health.mark_bootstrapped();
        let key = ServiceKey::new("testns", "foo");

        retries.record_failure(&key);
        assert_eq!(health.status(), Health::Healthy);

        retries.record_failure(&key);
        assert_eq!(
            health.status(),
            Health::Unhealthy("1 service(s) stalled".to_string())
        );

        retries.record_success(&key);
        assert_eq!(health.status(), Health::Healthy);
    }

    #[test]
    fn test_forgotten_stalled_service_no_longer_counts() {
        let (retries, health) = state(2);
        health.mark_bootstrapped();
        let deleted = ServiceKey::new("testns", "deleted");
        let invalid = ServiceKey::new("testns", "invalid");

        for _ in 0..2 {
            retries.record_failure(&deleted);
            retries.record_failure(&invalid);
        }
        assert_eq!(
            health.status(),
            Health::Unhealthy("2 service(s) stalled".to_string())
        );

        assert!(retries.forget(&deleted));
        assert_eq!(
            health.status(),
            Health::Unhealthy("1 service(s) stalled".to_string())
        );

        assert!(retries.forget(&invalid));
        assert_eq!(health.status(), Health::Healthy);
    }

    #[test]
    fn test_health_status_codes() {
        assert_eq!(Health::Healthy.into_response().status(), StatusCode::OK);
        assert_eq!(
            Health::Unhealthy("x".to_string()).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_metrics_handler_serves_text() {
        crate::metrics::record_sync_success(Duration::from_millis(1));

        let response = metrics_handler().await;

        assert_eq!(response.status(), StatusCode::OK);
    }
}

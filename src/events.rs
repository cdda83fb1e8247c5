// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes Events raised against Services the controller cannot program.

use crate::constants::EVENT_REPORTING_COMPONENT;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::jiff::Timestamp;
use kube::api::PostParams;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, warn};

/// Event type for problems a user must fix
pub const EVENT_TYPE_WARNING: &str = "Warning";

/// Reason on Events for Services whose spec or EndpointSlices are invalid
pub const REASON_INVALID_SERVICE_INPUT: &str = "InvalidServiceInput";

/// Build an Event whose involved object is `service`.
#[must_use]
pub fn service_event(service: &Service, event_type: &str, reason: &str, message: &str) -> Event {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    let now = Time(Timestamp::now());

    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{name}-")),
            namespace: Some(namespace.clone()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some(Service::api_version(&()).to_string()),
            kind: Some(Service::kind(&()).to_string()),
            name: Some(name),
            namespace: Some(namespace),
            uid: service.meta().uid.clone(),
            resource_version: service.meta().resource_version.clone(),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        type_: Some(event_type.to_string()),
        source: Some(EventSource {
            component: Some(EVENT_REPORTING_COMPONENT.to_string()),
            host: None,
        }),
        reporting_component: Some(EVENT_REPORTING_COMPONENT.to_string()),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        count: Some(1),
        ..Default::default()
    }
}

/// Publish a Warning Event for a Service whose input cannot be synced.
///
/// Failure to publish is logged and otherwise ignored.
pub async fn publish_invalid_input(client: &Client, service: &Service, message: &str) {
    let namespace = service.namespace().unwrap_or_default();
    let event_api: Api<Event> = Api::namespaced(client.clone(), &namespace);
    let event = service_event(service, EVENT_TYPE_WARNING, REASON_INVALID_SERVICE_INPUT, message);

    match event_api.create(&PostParams::default(), &event).await {
        Ok(_) => debug!(
            service = %format!("{namespace}/{}", service.name_any()),
            reason = REASON_INVALID_SERVICE_INPUT,
            "Published event"
        ),
        Err(e) => warn!(
            service = %format!("{namespace}/{}", service.name_any()),
            error = %e,
            "Failed to create event"
        ),
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod events_tests;

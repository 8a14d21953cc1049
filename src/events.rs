//! Kubernetes Event recording for the Viewer controller.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so reconcile code
//! can be exercised without an API server. Events show up in
//! `kubectl describe viewer` and are the user-facing record of evictions and
//! rejected specs.
//!
//! Publishing is fire-and-forget: a failed event is logged and never fails
//! the reconcile cycle.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Publishes Kubernetes Events about Viewers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason (see [`reasons`])
    /// * `action` - What the controller did (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production publisher backed by a kube-rs `Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown under REASON in `kubectl get events`
pub mod reasons {
    /// A Viewer was deleted to keep its type under the concurrency cap
    pub const VIEWER_EVICTED: &str = "ViewerEvicted";
    /// The Viewer's launch configuration cannot be turned into a workload
    pub const INVALID_VIEWER_SPEC: &str = "InvalidViewerSpec";
    /// A derived resource is controlled by another parent
    pub const OWNER_CONFLICT: &str = "OwnerConflict";
    /// The Deployment and/or Service were created
    pub const RESOURCES_CREATED: &str = "ResourcesCreated";
}

/// Event actions, shown under ACTION in `kubectl get events`
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Deleting a Viewer to admit a newer one
    pub const EVICT: &str = "Evict";
    /// Creating derived resources
    pub const CREATE: &str = "Create";
}

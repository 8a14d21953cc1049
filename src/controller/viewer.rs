//! Viewer controller implementation
//!
//! Each cycle fetches the Viewer, makes room for it under the per-type cap,
//! synthesizes its Deployment and Service, binds them to the Viewer and
//! creates whichever of them is missing. Existing derived resources are left
//! as they are, so repeating a cycle with nothing changed writes nothing.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::eviction::enforce_capacity;
use super::ownership::{bind, check_controller, controller_reference};
use crate::config::ControllerConfig;
use crate::crd::Viewer;
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::metrics::{self, ReconcileResult, ReconcileTimer};
use crate::store::{CreateOutcome, KubeObjectStore, ObjectStore};
use crate::workload::{synthesize, SynthesizedResources};
use crate::{Error, CONTROLLER_NAME};

/// Shared state for every reconcile
pub struct Context {
    /// Object store access (trait object for testability)
    pub store: Arc<dyn ObjectStore>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Validated controller settings
    pub config: ControllerConfig,
}

impl Context {
    /// Create a context talking to the API server through `client`
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            store: Arc::new(KubeObjectStore::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            config,
        }
    }

    /// Create a context from explicit collaborators
    ///
    /// Used by unit tests where no API server is available.
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            events,
            config,
        }
    }
}

/// How a reconcile cycle ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The Viewer is gone or being deleted; nothing was done
    Skipped,
    /// Both derived resources exist and are controlled by the Viewer
    Converged {
        /// Viewers deleted to make room
        evicted: Vec<String>,
        /// Derived resources created this cycle, as `Kind/name`
        created: Vec<String>,
    },
    /// The Viewer cannot be converged until its spec or the cluster changes
    Rejected {
        /// What the user has to fix
        reason: String,
    },
}

impl ReconcileOutcome {
    fn metric_result(&self) -> ReconcileResult {
        match self {
            Self::Skipped => ReconcileResult::Skipped,
            Self::Converged { .. } => ReconcileResult::Converged,
            Self::Rejected { .. } => ReconcileResult::Rejected,
        }
    }
}

/// Reconcile entry point for `kube::runtime::Controller`
#[instrument(
    skip(viewer, ctx),
    fields(viewer = %viewer.name_any(), namespace = %viewer.namespace().unwrap_or_default())
)]
pub async fn reconcile(viewer: Arc<Viewer>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start();
    let name = viewer.name_any();
    let Some(namespace) = viewer.namespace() else {
        error!("viewer has no namespace, ignoring");
        timer.finish(ReconcileResult::Skipped);
        return Ok(Action::await_change());
    };

    // Owned Deployments and Services are watched, so every outcome waits
    // for the next change
    match reconcile_viewer(&namespace, &name, &ctx).await {
        Ok(outcome) => {
            debug!(?outcome, "reconcile finished");
            timer.finish(outcome.metric_result());
            Ok(Action::await_change())
        }
        Err(e) => {
            timer.error(e.kind_label());
            Err(e)
        }
    }
}

/// Requeue policy for errors returned by [`reconcile`]
///
/// Every error that reaches here is requeued after the configured delay.
/// Specs that can never converge are turned into
/// [`ReconcileOutcome::Rejected`] before they get this far, so what remains
/// are store failures, including ones like a 403 that only an operator
/// can fix.
pub fn error_policy(viewer: Arc<Viewer>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(
            %error,
            viewer = %viewer.name_any(),
            requeue_after = ?ctx.config.requeue_after,
            "reconcile failed, requeueing"
        );
    } else {
        error!(
            %error,
            viewer = %viewer.name_any(),
            requeue_after = ?ctx.config.requeue_after,
            "reconcile failed with a non-transient error, requeueing"
        );
    }
    Action::requeue(ctx.config.requeue_after)
}

/// Run one reconcile cycle for the Viewer `namespace/name`
///
/// Transient store failures are returned as errors. Specs that cannot be
/// synthesized and derived resources owned by someone else end the cycle
/// with [`ReconcileOutcome::Rejected`] and a Warning Event on the Viewer.
pub async fn reconcile_viewer(
    namespace: &str,
    name: &str,
    ctx: &Context,
) -> Result<ReconcileOutcome, Error> {
    let Some(viewer) = ctx.store.get_viewer(namespace, name).await? else {
        debug!("viewer no longer exists");
        return Ok(ReconcileOutcome::Skipped);
    };
    if viewer.is_terminating() {
        debug!("viewer is being deleted");
        return Ok(ReconcileOutcome::Skipped);
    }

    match converge(&viewer, ctx).await {
        Ok(outcome) => Ok(outcome),
        Err(e @ Error::Validation { .. }) => {
            reject(&viewer, ctx, reasons::INVALID_VIEWER_SPEC, e).await
        }
        Err(e @ Error::OwnerConflict { .. }) => {
            reject(&viewer, ctx, reasons::OWNER_CONFLICT, e).await
        }
        Err(e) => Err(e),
    }
}

async fn converge(viewer: &Viewer, ctx: &Context) -> Result<ReconcileOutcome, Error> {
    let evicted = enforce_capacity(
        ctx.store.as_ref(),
        ctx.events.as_ref(),
        viewer,
        ctx.config.max_viewers,
        &ctx.config.eviction_retry,
    )
    .await?;

    let SynthesizedResources {
        mut deployment,
        mut service,
    } = synthesize(viewer, &ctx.config.synthesis)?;

    bind(viewer, &mut deployment)?;
    bind(viewer, &mut service)?;
    let owner_ref = controller_reference(viewer)?;

    let mut created = Vec::new();
    if ensure_deployment(ctx, &owner_ref, &deployment).await? {
        created.push(format!("Deployment/{}", deployment.name_any()));
    }
    if ensure_service(ctx, &owner_ref, &service).await? {
        created.push(format!("Service/{}", service.name_any()));
    }

    if !created.is_empty() {
        info!(created = ?created, evicted = ?evicted, "created viewer resources");
        ctx.events
            .publish(
                &viewer.object_ref(&()),
                EventType::Normal,
                reasons::RESOURCES_CREATED,
                actions::CREATE,
                Some(format!("Created {}", created.join(", "))),
            )
            .await;
    }

    Ok(ReconcileOutcome::Converged { evicted, created })
}

/// Create the Deployment unless it exists; true if this call created it
async fn ensure_deployment(
    ctx: &Context,
    owner_ref: &OwnerReference,
    desired: &Deployment,
) -> Result<bool, Error> {
    let (namespace, name) = identity(&desired.metadata)?;
    match ctx.store.get_deployment(namespace, name).await? {
        Some(existing) => {
            check_controller(owner_ref, &existing)?;
            Ok(false)
        }
        None => match ctx.store.create_deployment(desired).await? {
            CreateOutcome::Created => Ok(created("Deployment")),
            CreateOutcome::AlreadyExists => {
                let winner = ctx.store.get_deployment(namespace, name).await?;
                race_winner(owner_ref, name, winner.as_ref())
            }
        },
    }
}

/// Create the Service unless it exists; true if this call created it
async fn ensure_service(
    ctx: &Context,
    owner_ref: &OwnerReference,
    desired: &Service,
) -> Result<bool, Error> {
    let (namespace, name) = identity(&desired.metadata)?;
    match ctx.store.get_service(namespace, name).await? {
        Some(existing) => {
            check_controller(owner_ref, &existing)?;
            Ok(false)
        }
        None => match ctx.store.create_service(desired).await? {
            CreateOutcome::Created => Ok(created("Service")),
            CreateOutcome::AlreadyExists => {
                let winner = ctx.store.get_service(namespace, name).await?;
                race_winner(owner_ref, name, winner.as_ref())
            }
        },
    }
}

fn created(kind: &str) -> bool {
    metrics::record_created(kind);
    true
}

/// Settle a lost create race: the object that won must be ours
fn race_winner<K>(
    owner_ref: &OwnerReference,
    name: &str,
    winner: Option<&K>,
) -> Result<bool, Error>
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    match winner {
        Some(existing) => {
            check_controller(owner_ref, existing)?;
            debug!(%kind, name, "lost create race to an object we control");
            Ok(false)
        }
        None => Err(Error::internal_with_context(
            "converge",
            format!("{kind} {name} already exists but could not be read back"),
        )),
    }
}

fn identity(meta: &ObjectMeta) -> Result<(&str, &str), Error> {
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(namespace), Some(name)) => Ok((namespace, name)),
        _ => Err(Error::internal_with_context(
            "converge",
            "synthesized resource is missing its name or namespace",
        )),
    }
}

async fn reject(
    viewer: &Viewer,
    ctx: &Context,
    reason: &str,
    error: Error,
) -> Result<ReconcileOutcome, Error> {
    warn!(%error, reason, "viewer rejected");
    ctx.events
        .publish(
            &viewer.object_ref(&()),
            EventType::Warning,
            reason,
            actions::RECONCILE,
            Some(error.to_string()),
        )
        .await;
    Ok(ReconcileOutcome::Rejected {
        reason: error.to_string(),
    })
}

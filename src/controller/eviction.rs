//! Per-type concurrency cap for Viewers
//!
//! Before a Viewer's workload is created, the other live Viewers of the same
//! type in its namespace are counted. If admitting this one would exceed the
//! cap, the oldest are deleted; their Deployments and Services follow through
//! garbage collection.
//!
//! The cap is a soft target. Listing and deleting are separate API calls, so
//! concurrent reconciles of different Viewers can overshoot or undershoot by
//! a few instances.

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::crd::Viewer;
use crate::events::{actions, reasons, EventPublisher};
use crate::metrics;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::store::{DeleteOutcome, ObjectStore};
use crate::Error;

/// Default number of live Viewers allowed per type and namespace
pub const DEFAULT_MAX_VIEWERS: usize = 50;

/// Pick the Viewers to delete so that `current` fits under `cap`
///
/// Candidates are the Viewers in `viewers` sharing `current`'s type, other
/// than `current` itself and Viewers already being deleted. Oldest go first;
/// ties on creation time break by name and a missing timestamp counts as
/// oldest.
pub fn select_victims<'a>(viewers: &'a [Viewer], current: &Viewer, cap: usize) -> Vec<&'a Viewer> {
    let current_name = current.name_any();
    let mut live: Vec<&Viewer> = viewers
        .iter()
        .filter(|v| v.viewer_type() == current.viewer_type())
        .filter(|v| v.name_any() != current_name)
        .filter(|v| !v.is_terminating())
        .collect();

    let keep = cap.saturating_sub(1);
    if live.len() <= keep {
        return Vec::new();
    }

    live.sort_by_key(|v| (v.creation_timestamp().map(|t| t.0), v.name_any()));
    let excess = live.len() - keep;
    live.truncate(excess);
    live
}

/// Delete Viewers until `current` fits under `cap`
///
/// Returns the names of the Viewers that were deleted. Listing and each
/// delete get one retry on a transient store error before the error is
/// returned; a victim that disappears in between is not an error.
pub async fn enforce_capacity(
    store: &dyn ObjectStore,
    events: &dyn EventPublisher,
    current: &Viewer,
    cap: usize,
    retry: &RetryConfig,
) -> Result<Vec<String>, Error> {
    let namespace = current
        .namespace()
        .ok_or_else(|| Error::validation_for(current.name_any(), "Viewer must be namespaced"))?;

    let viewers = retry_with_backoff(retry, "list_viewers", || store.list_viewers(&namespace)).await?;
    let victims = select_victims(&viewers, current, cap);

    debug!(
        viewer_type = %current.viewer_type(),
        listed = viewers.len(),
        victims = victims.len(),
        cap,
        "evaluated viewer capacity"
    );

    let mut evicted = Vec::with_capacity(victims.len());
    for victim in victims {
        let name = victim.name_any();
        let outcome = retry_with_backoff(retry, "delete_viewer", || {
            store.delete_viewer(&namespace, &name)
        })
        .await?;

        if outcome == DeleteOutcome::AlreadyGone {
            debug!(victim = %name, "eviction victim already gone");
            continue;
        }

        info!(
            victim = %name,
            viewer_type = %victim.viewer_type(),
            evicted_for = %current.name_any(),
            "evicted viewer to respect concurrency cap"
        );
        metrics::record_eviction(victim.viewer_type());
        events
            .publish(
                &victim.object_ref(&()),
                EventType::Warning,
                reasons::VIEWER_EVICTED,
                actions::EVICT,
                Some(format!(
                    "Evicted to make room for Viewer {}: at most {} {} viewers may run in {}",
                    current.name_any(),
                    cap,
                    current.viewer_type(),
                    namespace
                )),
            )
            .await;
        evicted.push(name);
    }

    Ok(evicted)
}

//! Viewer controller
//!
//! - [`viewer`]: the reconcile loop and its `kube::runtime` adapter
//! - [`eviction`]: per-type concurrency cap
//! - [`ownership`]: controller owner references on derived resources

pub mod eviction;
pub mod ownership;
mod viewer;

pub use eviction::{enforce_capacity, select_victims, DEFAULT_MAX_VIEWERS};
pub use ownership::{bind, check_controller, controller_reference};
pub use viewer::{error_policy, reconcile, reconcile_viewer, Context, ReconcileOutcome};

//! Viewer operator - runs visualization workloads declared as `Viewer` resources
//!
//! Every `Viewer` (kubeflow.org/v1beta1) becomes a Deployment running the
//! viewer loader and a Service routed through Ambassador at
//! `/{type}/{name}/`. Both are owned by the Viewer, so deleting it removes
//! them. Per type and namespace at most a configured number of Viewers are
//! kept; the oldest are evicted to admit new ones.
//!
//! # Modules
//!
//! - [`crd`] - The `Viewer` custom resource
//! - [`workload`] - Pure synthesis of the Deployment and Service
//! - [`controller`] - Reconcile loop, eviction policy and ownership binding
//! - [`store`] - Object store trait and its kube-rs implementation
//! - [`config`] - CLI/environment configuration
//! - [`events`] - Kubernetes Events
//! - [`telemetry`] / [`metrics`] - Logs, traces and metrics
//! - [`retry`] - Backoff for transient store failures
//! - [`kube_utils`] - Client construction and CRD installation
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name reported on Events and used as the server-side apply field manager
pub const CONTROLLER_NAME: &str = "viewer-controller";

/// Field manager for every write the controller makes
pub const FIELD_MANAGER: &str = CONTROLLER_NAME;

/// Watch timeout in seconds; kept below the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;

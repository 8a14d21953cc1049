//! Error types for the Viewer operator
//!
//! Malformed specs and ownership conflicts end the cycle and are surfaced to
//! the user as Kubernetes Events. Every other error requeues the request.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Viewer operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The Viewer spec cannot be turned into a workload
    #[error("invalid viewer {viewer}: {message}")]
    Validation {
        /// Name of the offending Viewer
        viewer: String,
        /// Description of what's invalid
        message: String,
    },

    /// A derived resource is already controlled by a different parent
    #[error("{kind} {name} is already owned by {existing_owner}")]
    OwnerConflict {
        /// Kind of the derived resource (Deployment, Service)
        kind: String,
        /// Name of the derived resource
        name: String,
        /// `Kind/name` of the parent currently holding the controller reference
        existing_owner: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "eviction", "ownership")
        context: String,
    },
}

impl Error {
    /// Create a validation error without Viewer context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            viewer: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific Viewer
    pub fn validation_for(viewer: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            viewer: viewer.into(),
            message: msg.into(),
        }
    }

    /// Create an ownership conflict error
    pub fn owner_conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        existing_owner: impl Into<String>,
    ) -> Self {
        Self::OwnerConflict {
            kind: kind.into(),
            name: name.into(),
            existing_owner: existing_owner.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if retrying this error right away can succeed
    ///
    /// Used for in-cycle backoff only; the controller requeues every store
    /// error regardless. Validation, ownership and serialization errors fail
    /// the same way on the same input. Kubernetes errors are retryable
    /// unless the API server rejected the request with a 4xx, except for
    /// conflicts (409) and throttling (429) which clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(source) => match source {
                kube::Error::Api(ae) => {
                    !(400..500).contains(&ae.code) || ae.code == 409 || ae.code == 429
                }
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::OwnerConflict { .. } => false,
            Error::Serialization(_) => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the Viewer name if this error is associated with one
    pub fn viewer(&self) -> Option<&str> {
        match self {
            Error::Validation { viewer, .. } => Some(viewer),
            _ => None,
        }
    }

    /// Short label used for metrics and logs
    pub fn kind_label(&self) -> &'static str {
        if self.is_retryable() {
            "transient"
        } else {
            "permanent"
        }
    }
}

/// Returns true if the error is a Kubernetes 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Returns true if the error is a Kubernetes 409 with reason AlreadyExists
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

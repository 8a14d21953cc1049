//! Controller configuration
//!
//! Settings come from CLI flags with environment variable fallbacks and are
//! validated once at startup, before any watch is opened.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::controller::DEFAULT_MAX_VIEWERS;
use crate::retry::RetryConfig;
use crate::workload::{
    GitSecretRef, SynthesisConfig, DEFAULT_FLEXY_VIS_IMAGE, DEFAULT_GIT_SECRET_KEY,
    DEFAULT_GIT_SECRET_NAME, DEFAULT_TARGET_PORT,
};
use crate::Error;

/// Delay before a transiently failed Viewer is reconciled again
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(15);

/// Attempts per store call during eviction (first try plus one retry)
pub const EVICTION_ATTEMPTS: u32 = 2;

/// Command line arguments for the controller
#[derive(Args, Debug, Clone)]
pub struct ControllerArgs {
    /// Path to a kubeconfig file; inferred when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Maximum number of live Viewers per type and namespace
    #[arg(long, env = "VIEWER_MAX_NUM_VIEWERS", default_value_t = DEFAULT_MAX_VIEWERS)]
    pub max_viewers: usize,

    /// Container image running the viewer loader
    #[arg(long, env = "VIEWER_FLEXY_VIS_IMAGE", default_value = DEFAULT_FLEXY_VIS_IMAGE)]
    pub image: String,

    /// Secret holding the git token mounted into viewer pods
    #[arg(long, env = "VIEWER_GIT_SECRET_NAME", default_value = DEFAULT_GIT_SECRET_NAME)]
    pub git_secret_name: String,

    /// Key of the git token within the secret
    #[arg(long, env = "VIEWER_GIT_SECRET_KEY", default_value = DEFAULT_GIT_SECRET_KEY)]
    pub git_secret_key: String,

    /// Only watch Viewers in this namespace (all namespaces when unset)
    #[arg(long, env = "VIEWER_WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds to wait before retrying a transiently failed reconcile
    #[arg(long, default_value_t = DEFAULT_REQUEUE_AFTER.as_secs())]
    pub requeue_after_secs: u64,
}

impl ControllerArgs {
    /// Build and validate the controller configuration
    pub fn into_config(self) -> Result<ControllerConfig, Error> {
        let config = ControllerConfig {
            max_viewers: self.max_viewers,
            synthesis: SynthesisConfig {
                image: self.image,
                target_port: DEFAULT_TARGET_PORT,
                git_secret: GitSecretRef {
                    name: self.git_secret_name,
                    key: self.git_secret_key,
                },
            },
            requeue_after: Duration::from_secs(self.requeue_after_secs),
            watch_namespace: self.namespace.filter(|ns| !ns.is_empty()),
            eviction_retry: RetryConfig::with_max_attempts(EVICTION_ATTEMPTS),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Validated runtime configuration shared by every reconcile
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Maximum number of live Viewers per type and namespace
    pub max_viewers: usize,
    /// Inputs to workload synthesis
    pub synthesis: SynthesisConfig,
    /// Requeue delay after a transient failure
    pub requeue_after: Duration,
    /// Namespace to watch, `None` for all
    pub watch_namespace: Option<String>,
    /// Retry policy for eviction store calls
    pub eviction_retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_viewers: DEFAULT_MAX_VIEWERS,
            synthesis: SynthesisConfig::default(),
            requeue_after: DEFAULT_REQUEUE_AFTER,
            watch_namespace: None,
            eviction_retry: RetryConfig::with_max_attempts(EVICTION_ATTEMPTS),
        }
    }
}

impl ControllerConfig {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_viewers == 0 {
            return Err(Error::internal_with_context(
                "config",
                "max viewers must be at least 1",
            ));
        }
        if self.synthesis.image.trim().is_empty() {
            return Err(Error::internal_with_context(
                "config",
                "viewer image must not be empty",
            ));
        }
        if self.synthesis.git_secret.name.trim().is_empty() {
            return Err(Error::internal_with_context(
                "config",
                "git secret name must not be empty",
            ));
        }
        if self.synthesis.git_secret.key.trim().is_empty() {
            return Err(Error::internal_with_context(
                "config",
                "git secret key must not be empty",
            ));
        }
        if self.synthesis.target_port == 0 {
            return Err(Error::internal_with_context(
                "config",
                "target port must be non-zero",
            ));
        }
        Ok(())
    }
}

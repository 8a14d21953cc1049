//! Kubernetes client construction and CRD installation

use std::path::Path;
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, CustomResourceExt};
use tracing::info;

use crate::crd::Viewer;
use crate::{Error, FIELD_MANAGER};

/// Connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for kube clients; must stay above the watch timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from an optional kubeconfig path with custom timeouts
///
/// Without a path the config is inferred (in-cluster service account, then
/// `$KUBECONFIG` / `~/.kube/config`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Full name of the Viewer CRD object
pub fn viewer_crd_name() -> String {
    let crd = Viewer::crd();
    format!("{}.{}", crd.spec.names.plural, crd.spec.group)
}

/// Viewer CRD rendered as a YAML manifest
pub fn viewer_crd_yaml() -> Result<String, Error> {
    serde_yaml::to_string(&Viewer::crd()).map_err(|e| Error::serialization(e.to_string()))
}

/// Install or update the Viewer CRD with server-side apply
pub async fn ensure_viewer_crd(client: &Client) -> Result<(), Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let name = viewer_crd_name();

    info!(crd = %name, "Installing Viewer CRD");
    crds.patch(&name, &params, &Patch::Apply(&Viewer::crd()))
        .await?;
    info!(crd = %name, "Viewer CRD installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_name_is_plural_dot_group() {
        assert_eq!(viewer_crd_name(), "viewers.kubeflow.org");
    }

    #[test]
    fn crd_manifest_is_yaml() {
        let yaml = viewer_crd_yaml().unwrap();
        assert!(yaml.contains("kind: CustomResourceDefinition"));
        assert!(yaml.contains("name: viewers.kubeflow.org"));
    }

    #[test]
    fn read_timeout_exceeds_watch_timeout() {
        assert!(DEFAULT_READ_TIMEOUT > Duration::from_secs(crate::WATCH_TIMEOUT_SECS.into()));
    }

    #[tokio::test]
    async fn missing_kubeconfig_is_an_internal_error() {
        let err = create_client(Some(Path::new("/nonexistent/kubeconfig")))
            .await
            .err().unwrap();
        assert!(err.to_string().contains("create_client"));
    }
}

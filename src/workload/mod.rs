//! Workload synthesis for Viewers
//!
//! Turns a [`Viewer`] into the two resources that make it reachable:
//! - Deployment: runs the streamlit loader with the Viewer's launch parameters
//! - Service: exposes the loader's port and carries the Ambassador route
//!
//! Synthesis is pure and deterministic. The same Viewer always produces
//! byte-identical objects, so re-running a reconcile never causes churn.

mod params;
mod routing;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, SecretKeySelector, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::Viewer;
use crate::Error;

pub use params::{LaunchParams, LaunchValue, ENTRY_POINT_KEY, SOURCE_KEY, UNSET_VALUE};
pub use routing::{ambassador_mapping, route_prefix, AMBASSADOR_CONFIG_ANNOTATION};

/// Port the streamlit loader listens on
pub const DEFAULT_TARGET_PORT: u16 = 8501;

/// Port the viewer Service exposes
pub const SERVICE_PORT: i32 = 80;

/// Loader image used when none is configured
pub const DEFAULT_FLEXY_VIS_IMAGE: &str = "dmitryb/kf-flexy-vis-loader:latest";

/// Secret holding the token the loader uses to clone private projects
pub const DEFAULT_GIT_SECRET_NAME: &str = "viewer-git-credentials";

/// Key of the token within [`DEFAULT_GIT_SECRET_NAME`]
pub const DEFAULT_GIT_SECRET_KEY: &str = "token";

/// Value of the `app` label on every derived resource
pub const APP_LABEL_VALUE: &str = "viewer";

/// Metadata label recording the Viewer type on derived Deployments
pub const VIEWER_TYPE_LABEL: &str = "viewer-type";

/// Environment variable carrying the project location
pub const ENV_GIT_PROJECT_URL: &str = "GIT_PROJECT_URL";
/// Environment variable carrying the clone token
pub const ENV_GIT_SECRET: &str = "GIT_SECRET";
/// Environment variable carrying the script to run
pub const ENV_ENTRY_POINT: &str = "ENTRY_POINT";

/// Reference to the Secret key that holds the git token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitSecretRef {
    /// Secret name, in the Viewer's namespace
    pub name: String,
    /// Key within the Secret
    pub key: String,
}

impl Default for GitSecretRef {
    fn default() -> Self {
        Self {
            name: DEFAULT_GIT_SECRET_NAME.to_string(),
            key: DEFAULT_GIT_SECRET_KEY.to_string(),
        }
    }
}

/// Inputs to synthesis that come from operator configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesisConfig {
    /// Loader container image
    pub image: String,
    /// Port the loader listens on
    pub target_port: u16,
    /// Where the loader's git token lives
    pub git_secret: GitSecretRef,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_FLEXY_VIS_IMAGE.to_string(),
            target_port: DEFAULT_TARGET_PORT,
            git_secret: GitSecretRef::default(),
        }
    }
}

/// Resources derived from one Viewer
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesizedResources {
    /// Loader Deployment
    pub deployment: Deployment,
    /// Service in front of the Deployment
    pub service: Service,
}

/// Name of the Deployment derived from a Viewer
pub fn deployment_name(viewer_name: &str) -> String {
    format!("{viewer_name}-deployment")
}

/// Name of the Service derived from a Viewer
pub fn service_name(viewer_name: &str) -> String {
    format!("{viewer_name}-service")
}

/// Labels shared by the Deployment selector, its pods, and the Service selector
pub fn selector_labels(viewer_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("deployment".to_string(), deployment_name(viewer_name)),
        ("app".to_string(), APP_LABEL_VALUE.to_string()),
        ("viewer".to_string(), viewer_name.to_string()),
    ])
}

/// Longest value Kubernetes accepts for a label value or a Service name
pub const MAX_LABEL_LEN: usize = 63;

/// Check that the names and label values derived from a Viewer are accepted
/// by the API server
///
/// Viewer names may be up to 253 characters and contain dots, but the
/// derived `deployment` label and the Service name are limited to 63
/// characters and the Service name must be a DNS-1035 label.
pub fn validate_derived_names(viewer_name: &str, viewer_type: &str) -> Result<(), Error> {
    for (key, value) in selector_labels(viewer_name)
        .into_iter()
        .chain([(VIEWER_TYPE_LABEL.to_string(), viewer_type.to_string())])
    {
        if !is_label_value(&value) {
            return Err(Error::validation_for(
                viewer_name,
                format!(
                    "label {key}={value} is not a valid label value \
                     (at most {MAX_LABEL_LEN} alphanumerics, '-', '_' or '.')"
                ),
            ));
        }
    }

    let svc_name = service_name(viewer_name);
    if !is_dns1035_label(&svc_name) {
        return Err(Error::validation_for(
            viewer_name,
            format!(
                "Service name {svc_name} is not a DNS-1035 label \
                 (at most {MAX_LABEL_LEN} lowercase alphanumerics or '-', starting with a letter)"
            ),
        ));
    }
    Ok(())
}

fn is_label_value(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let bytes = value.as_bytes();
    value.len() <= MAX_LABEL_LEN
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn is_dns1035_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && value.len() <= MAX_LABEL_LEN
        && bytes[0].is_ascii_lowercase()
        && (bytes[bytes.len() - 1].is_ascii_lowercase() || bytes[bytes.len() - 1].is_ascii_digit())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// Synthesize the Deployment and Service for a Viewer
///
/// Fails with a validation error when the Viewer is not namespaced, its name
/// yields labels or a Service name the API server would refuse, or its
/// launch configuration contains values that can't be passed on a command
/// line. Nothing is partially built on failure.
pub fn synthesize(
    viewer: &Viewer,
    config: &SynthesisConfig,
) -> Result<SynthesizedResources, Error> {
    let name = viewer
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::validation("Viewer has no name"))?;
    let namespace = viewer
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "Viewer must be namespaced"))?;

    validate_derived_names(&name, viewer.viewer_type())?;
    let params = LaunchParams::from_spec(&name, &viewer.spec.flexy_vis_spec)?;

    let deployment = build_deployment(viewer, &name, &namespace, &params, config);
    let service = build_service(viewer.viewer_type(), &name, &namespace, config.target_port);

    Ok(SynthesizedResources {
        deployment,
        service,
    })
}

fn build_deployment(
    viewer: &Viewer,
    name: &str,
    namespace: &str,
    params: &LaunchParams,
    config: &SynthesisConfig,
) -> Deployment {
    let labels = selector_labels(name);

    let mut template = viewer.spec.pod_template_spec.clone().unwrap_or_default();
    template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels.clone());

    let pod_spec = template.spec.get_or_insert_with(Default::default);
    if pod_spec.containers.is_empty() {
        pod_spec.containers.push(Container::default());
    }
    configure_loader_container(&mut pod_spec.containers[0], name, params, config);

    let mut metadata_labels = labels.clone();
    metadata_labels.insert(
        VIEWER_TYPE_LABEL.to_string(),
        viewer.viewer_type().to_string(),
    );

    Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(name)),
            namespace: Some(namespace.to_string()),
            labels: Some(metadata_labels),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn configure_loader_container(
    container: &mut Container,
    viewer_name: &str,
    params: &LaunchParams,
    config: &SynthesisConfig,
) {
    container.name = format!("{viewer_name}-pod");
    container.image = Some(config.image.clone());
    container.args = Some(params.args());
    container.ports = Some(vec![ContainerPort {
        container_port: i32::from(config.target_port),
        ..Default::default()
    }]);
    container.env = Some(vec![
        EnvVar {
            name: ENV_GIT_PROJECT_URL.to_string(),
            value: Some(params.source.clone()),
            ..Default::default()
        },
        EnvVar {
            name: ENV_GIT_SECRET.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: config.git_secret.name.clone(),
                    key: config.git_secret.key.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvVar {
            name: ENV_ENTRY_POINT.to_string(),
            value: Some(params.entry_point.clone()),
            ..Default::default()
        },
    ]);
}

fn build_service(viewer_type: &str, name: &str, namespace: &str, target_port: u16) -> Service {
    let svc_name = service_name(name);
    let prefix = route_prefix(viewer_type, name);
    let mapping = ambassador_mapping(name, &prefix, &svc_name);

    Service {
        metadata: ObjectMeta {
            name: Some(svc_name),
            namespace: Some(namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                AMBASSADOR_CONFIG_ANNOTATION.to_string(),
                mapping,
            )])),
            labels: Some(BTreeMap::from([
                ("app".to_string(), APP_LABEL_VALUE.to_string()),
                ("viewer".to_string(), name.to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(i32::from(target_port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

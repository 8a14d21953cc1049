//! Viewer CRD types
//!
//! A `Viewer` declares one visualization process: which program to launch,
//! where its source lives, and the launch parameters it takes. The controller
//! derives a Deployment and a Service from it and never writes the Viewer
//! itself.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Viewer type tag for streamlit-based flexible visualizations
pub const FLEXY_VIS_TYPE: &str = "flexy-vis";

/// Viewer declares a single visualization workload.
///
/// The `type` tag groups Viewers for concurrency capping: within one
/// namespace, at most a configured number of Viewers of the same type are
/// kept alive and the oldest ones are evicted to make room for new ones.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubeflow.org",
    version = "v1beta1",
    kind = "Viewer",
    plural = "viewers",
    shortname = "vi",
    namespaced,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ViewerSpec {
    /// Viewer type tag (e.g. "flexy-vis")
    #[serde(rename = "type")]
    pub type_: String,

    /// Launch configuration for the visualization process
    ///
    /// Two keys are reserved: `source` (git location of the project) and
    /// `entry_point` (script to run). Every other key is passed to the
    /// program as `--<key> <value>`. Values must be strings, numbers or
    /// booleans.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub flexy_vis_spec: BTreeMap<String, serde_json::Value>,

    /// Base pod template (container defaults, volumes, resources)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub pod_template_spec: Option<PodTemplateSpec>,
}

impl Viewer {
    /// The Viewer's type tag
    pub fn viewer_type(&self) -> &str {
        &self.spec.type_
    }

    /// True if the API server has started deleting this Viewer
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

/// Schema for free-form objects the API server must store verbatim
fn preserve_unknown_object(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};

    #[test]
    fn crd_identity_matches_kubeflow_viewer() {
        let crd = Viewer::crd();
        assert_eq!(crd.spec.group, "kubeflow.org");
        assert_eq!(crd.spec.names.kind, "Viewer");
        assert_eq!(crd.spec.names.plural, "viewers");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(Viewer::api_version(&()), "kubeflow.org/v1beta1");
    }

    #[test]
    fn free_form_fields_preserve_unknown_fields() {
        let crd = serde_json::to_value(Viewer::crd()).unwrap();
        let spec = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]
            ["properties"];
        assert_eq!(
            spec["flexyVisSpec"]["x-kubernetes-preserve-unknown-fields"],
            serde_json::Value::Bool(true)
        );
        assert_eq!(
            spec["podTemplateSpec"]["x-kubernetes-preserve-unknown-fields"],
            serde_json::Value::Bool(true)
        );
    }

    #[test]
    fn spec_deserializes_from_wire_format() {
        let spec: ViewerSpec = serde_json::from_value(serde_json::json!({
            "type": "flexy-vis",
            "flexyVisSpec": {
                "source": "git://x",
                "entry_point": "app.py",
                "epochs": 3
            },
            "podTemplateSpec": {
                "spec": { "containers": [{ "name": "base" }] }
            }
        }))
        .unwrap();

        assert_eq!(spec.type_, FLEXY_VIS_TYPE);
        assert_eq!(spec.flexy_vis_spec.len(), 3);
        assert_eq!(spec.flexy_vis_spec["epochs"], serde_json::json!(3));
        let containers = spec
            .pod_template_spec
            .and_then(|t| t.spec)
            .map(|s| s.containers)
            .unwrap();
        assert_eq!(containers[0].name, "base");
    }

    #[test]
    fn terminating_viewer_is_detected() {
        let mut viewer = Viewer::new("v1", ViewerSpec::default());
        assert!(!viewer.is_terminating());
        viewer.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        assert!(viewer.is_terminating());
    }
}

//! Synthesis behavior through the public API
//!
//! These tests build Viewers the way they arrive from the API server (JSON
//! on the wire) and check the resulting Deployment and Service.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::json;

use viewer_operator::controller::bind;
use viewer_operator::crd::Viewer;
use viewer_operator::workload::{
    selector_labels, synthesize, SynthesisConfig, AMBASSADOR_CONFIG_ANNOTATION,
};

fn viewer_from_wire(value: serde_json::Value) -> Viewer {
    serde_json::from_value(value).expect("valid Viewer JSON")
}

fn flexy_viewer() -> Viewer {
    viewer_from_wire(json!({
        "apiVersion": "kubeflow.org/v1beta1",
        "kind": "Viewer",
        "metadata": { "name": "v1", "namespace": "ns", "uid": "uid-v1" },
        "spec": {
            "type": "flexy",
            "flexyVisSpec": {
                "source": "git://x",
                "entry_point": "app.py",
                "foo": "bar"
            }
        }
    }))
}

#[test]
fn wire_viewer_synthesizes_documented_workload() {
    let out = synthesize(&flexy_viewer(), &SynthesisConfig::default()).unwrap();

    let spec = out.deployment.spec.as_ref().unwrap();
    let container = &spec.template.spec.as_ref().unwrap().containers[0];
    assert_eq!(
        container.args.clone().unwrap(),
        vec!["streamlit", "run", "app.py", "--", "--foo", "bar"]
    );
    let project = container
        .env
        .as_ref()
        .unwrap()
        .iter()
        .find(|e| e.name == "GIT_PROJECT_URL")
        .and_then(|e| e.value.clone());
    assert_eq!(project.as_deref(), Some("git://x"));
    assert_eq!(spec.selector.match_labels.as_ref(), Some(&selector_labels("v1")));
}

#[test]
fn service_annotation_is_bit_exact() {
    let out = synthesize(&flexy_viewer(), &SynthesisConfig::default()).unwrap();

    let annotations = out.service.metadata.annotations.as_ref().unwrap();
    let annotation = &annotations[AMBASSADOR_CONFIG_ANNOTATION];
    assert_eq!(
        annotation,
        "\n---\napiVersion: ambassador/v0\nkind: Mapping\nname: viewer-mapping-v1\nprefix: /flexy/v1/\nrewrite: /\nservice: v1-service"
    );

    let port = &out.service.spec.as_ref().unwrap().ports.as_ref().unwrap()[0];
    assert_eq!(port.port, 80);
    assert_eq!(port.target_port, Some(IntOrString::Int(8501)));
}

#[test]
fn synthesized_resources_bind_to_their_viewer() {
    let viewer = flexy_viewer();
    let mut out = synthesize(&viewer, &SynthesisConfig::default()).unwrap();

    bind(&viewer, &mut out.deployment).unwrap();
    bind(&viewer, &mut out.service).unwrap();

    for refs in [
        out.deployment.metadata.owner_references.unwrap(),
        out.service.metadata.owner_references.unwrap(),
    ] {
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "uid-v1");
        assert_eq!(refs[0].controller, Some(true));
    }
}

#[test]
fn argument_list_is_stable_across_key_order() {
    let a = viewer_from_wire(json!({
        "apiVersion": "kubeflow.org/v1beta1",
        "kind": "Viewer",
        "metadata": { "name": "v1", "namespace": "ns" },
        "spec": { "type": "flexy", "flexyVisSpec": { "z": 1, "a": true, "m": "x" } }
    }));
    let b = viewer_from_wire(json!({
        "apiVersion": "kubeflow.org/v1beta1",
        "kind": "Viewer",
        "metadata": { "name": "v1", "namespace": "ns" },
        "spec": { "type": "flexy", "flexyVisSpec": { "m": "x", "a": true, "z": 1 } }
    }));

    let config = SynthesisConfig::default();
    let args = |v: &Viewer| {
        let pod = synthesize(v, &config)
            .unwrap()
            .deployment
            .spec
            .unwrap()
            .template
            .spec
            .unwrap();
        pod.containers[0].args.clone().unwrap()
    };

    assert_eq!(args(&a), args(&b));
    assert_eq!(
        args(&a),
        vec!["streamlit", "run", "no", "--", "--a", "true", "--m", "x", "--z", "1"]
    );
}

#[test]
fn nested_launch_value_is_rejected() {
    let viewer = viewer_from_wire(json!({
        "apiVersion": "kubeflow.org/v1beta1",
        "kind": "Viewer",
        "metadata": { "name": "v1", "namespace": "ns" },
        "spec": { "type": "flexy", "flexyVisSpec": { "opts": { "deep": true } } }
    }));

    let err = synthesize(&viewer, &SynthesisConfig::default()).unwrap_err();
    assert!(err.to_string().contains("flexyVisSpec.opts"));
    assert!(!err.is_retryable());
}

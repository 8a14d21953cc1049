//! Ambassador routing annotation attached to viewer Services
//!
//! The ingress reads this annotation to expose each viewer under
//! `/{type}/{name}/`. Field order and literal keys are parsed by Ambassador
//! and must not change.

/// Annotation key Ambassador watches on Services
pub const AMBASSADOR_CONFIG_ANNOTATION: &str = "getambassador.io/config";

/// URL prefix a viewer is served under
pub fn route_prefix(viewer_type: &str, viewer_name: &str) -> String {
    format!("/{viewer_type}/{viewer_name}/")
}

/// Ambassador v0 `Mapping` routing `prefix` to the viewer's Service
pub fn ambassador_mapping(viewer_name: &str, prefix: &str, service_name: &str) -> String {
    format!(
        "\n---\napiVersion: ambassador/v0\nkind: Mapping\nname: viewer-mapping-{viewer_name}\nprefix: {prefix}\nrewrite: /\nservice: {service_name}"
    )
}

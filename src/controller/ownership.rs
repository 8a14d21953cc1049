//! Controller owner references between a Viewer and its derived resources
//!
//! The owner reference is what lets the garbage collector remove a Viewer's
//! Deployment and Service when the Viewer is deleted, including when the
//! eviction policy deletes it. A derived resource can have at most one
//! controller, and it is never re-pointed at a different Viewer.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::Viewer;
use crate::Error;

/// Controller reference pointing at `owner`
///
/// Fails if the Viewer has not been persisted yet (no uid).
pub fn controller_reference(owner: &Viewer) -> Result<OwnerReference, Error> {
    let mut owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "ownership",
            format!("Viewer {} has no uid", owner.name_any()),
        )
    })?;
    // Foreground deletion of the Viewer waits for its children
    owner_ref.block_owner_deletion = Some(true);
    Ok(owner_ref)
}

/// Fail with [`Error::OwnerConflict`] if `child` is controlled by something other than `owner_ref`
pub fn check_controller<K>(owner_ref: &OwnerReference, child: &K) -> Result<(), Error>
where
    K: Resource<DynamicType = ()>,
{
    let existing = child
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true));

    match existing {
        Some(current) if current.uid != owner_ref.uid => Err(Error::owner_conflict(
            K::kind(&()),
            child.name_any(),
            format!("{}/{}", current.kind, current.name),
        )),
        _ => Ok(()),
    }
}

/// Make `owner` the controller of `child`
///
/// Binding is idempotent for the same owner. Other non-controller owner
/// references are left alone. On conflict `child` is not modified.
pub fn bind<K>(owner: &Viewer, child: &mut K) -> Result<(), Error>
where
    K: Resource<DynamicType = ()>,
{
    let owner_ref = controller_reference(owner)?;
    check_controller(&owner_ref, child)?;

    let refs = child.owner_references_mut();
    let already_bound = refs
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == owner_ref.uid);
    if !already_bound {
        refs.push(owner_ref);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ViewerSpec;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn viewer(name: &str, uid: Option<&str>) -> Viewer {
        let mut v = Viewer::new(name, ViewerSpec::default());
        v.metadata.namespace = Some("ns".to_string());
        v.metadata.uid = uid.map(str::to_string);
        v
    }

    fn deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn binding_sets_a_blocking_controller_reference() {
        let owner = viewer("v1", Some("uid-1"));
        let mut child = deployment("v1-deployment");

        bind(&owner, &mut child).unwrap();

        let refs = child.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "Viewer");
        assert_eq!(refs[0].api_version, "kubeflow.org/v1beta1");
        assert_eq!(refs[0].name, "v1");
        assert_eq!(refs[0].uid, "uid-1");
        assert_eq!(refs[0].controller, Some(true));
        assert_eq!(refs[0].block_owner_deletion, Some(true));
    }

    #[test]
    fn binding_twice_is_idempotent() {
        let owner = viewer("v1", Some("uid-1"));
        let mut child = Service::default();

        bind(&owner, &mut child).unwrap();
        bind(&owner, &mut child).unwrap();

        assert_eq!(child.metadata.owner_references.unwrap().len(), 1);
    }

    /// Story: a Deployment already controlled by another Viewer is never
    /// taken over, and is left exactly as it was
    #[test]
    fn story_conflicting_owner_is_rejected_without_mutation() {
        let first = viewer("v1", Some("uid-1"));
        let second = viewer("v2", Some("uid-2"));
        let mut child = deployment("shared");
        bind(&first, &mut child).unwrap();
        let before = child.clone();

        let err = bind(&second, &mut child).unwrap_err();

        assert!(matches!(err, Error::OwnerConflict { .. }));
        assert_eq!(err.to_string(), "Deployment shared is already owned by Viewer/v1");
        assert!(!err.is_retryable());
        assert_eq!(child, before);
    }

    #[test]
    fn non_controller_references_are_preserved() {
        let owner = viewer("v1", Some("uid-1"));
        let mut child = deployment("v1-deployment");
        child.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "cm".to_string(),
            uid: "uid-cm".to_string(),
            controller: None,
            block_owner_deletion: None,
        }]);

        bind(&owner, &mut child).unwrap();

        let refs = child.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, "ConfigMap");
        assert_eq!(refs[1].uid, "uid-1");
    }

    #[test]
    fn unpersisted_owner_cannot_be_bound() {
        let owner = viewer("v1", None);
        let mut child = deployment("v1-deployment");

        let err = bind(&owner, &mut child).unwrap_err();

        assert!(err.to_string().contains("has no uid"));
        assert!(child.metadata.owner_references.is_none());
    }

    #[test]
    fn check_accepts_unowned_and_self_owned_children() {
        let owner = viewer("v1", Some("uid-1"));
        let owner_ref = controller_reference(&owner).unwrap();
        let mut child = deployment("v1-deployment");

        assert!(check_controller(&owner_ref, &child).is_ok());
        bind(&owner, &mut child).unwrap();
        assert!(check_controller(&owner_ref, &child).is_ok());
    }
}

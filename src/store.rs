//! Object store access for the Viewer controller
//!
//! [`ObjectStore`] is the only seam between reconcile logic and the API
//! server. Not-found reads come back as `Ok(None)`, racing creates as
//! [`CreateOutcome::AlreadyExists`] and deletes of vanished objects as
//! [`DeleteOutcome::AlreadyGone`], so callers only see errors for failures
//! they actually have to handle.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::Viewer;
use crate::error::{is_already_exists, is_not_found};
use crate::{Error, FIELD_MANAGER};

/// Result of a create call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// An object with the same identity already existed
    AlreadyExists,
}

/// Result of a delete call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deletion was accepted
    Deleted,
    /// The object no longer existed
    AlreadyGone,
}

/// Typed access to the objects the controller reads and writes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a Viewer, `None` if it does not exist
    async fn get_viewer(&self, namespace: &str, name: &str) -> Result<Option<Viewer>, Error>;

    /// List all Viewers in a namespace
    async fn list_viewers(&self, namespace: &str) -> Result<Vec<Viewer>, Error>;

    /// Delete a Viewer; its derived resources are garbage collected
    async fn delete_viewer(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, Error>;

    /// Fetch a Deployment, `None` if it does not exist
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Create a Deployment in its metadata namespace
    async fn create_deployment(&self, deployment: &Deployment) -> Result<CreateOutcome, Error>;

    /// Fetch a Service, `None` if it does not exist
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Create a Service in its metadata namespace
    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error>;
}

/// [`ObjectStore`] backed by the Kubernetes API server
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create<K>(&self, obj: &K) -> Result<CreateOutcome, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let namespace = obj.namespace().ok_or_else(|| {
            Error::internal_with_context(
                "create",
                format!("{} {} has no namespace", K::kind(&()), obj.name_any()),
            )
        })?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match self.api::<K>(&namespace).create(&params, obj).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e) if is_already_exists(&e) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get_viewer(&self, namespace: &str, name: &str) -> Result<Option<Viewer>, Error> {
        Ok(self.api::<Viewer>(namespace).get_opt(name).await?)
    }

    async fn list_viewers(&self, namespace: &str) -> Result<Vec<Viewer>, Error> {
        let list = self
            .api::<Viewer>(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn delete_viewer(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, Error> {
        match self
            .api::<Viewer>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) if is_not_found(&e) => Ok(DeleteOutcome::AlreadyGone),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self.api::<Deployment>(namespace).get_opt(name).await?)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<CreateOutcome, Error> {
        self.create(deployment).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        Ok(self.api::<Service>(namespace).get_opt(name).await?)
    }

    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error> {
        self.create(service).await
    }
}

/// In-memory [`ObjectStore`] for tests
///
/// Deleting a Viewer also removes the Deployments and Services it controls,
/// standing in for the garbage collector. Every successful write bumps a
/// mutation counter.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    type Key = (String, String);

    #[derive(Default)]
    struct State {
        viewers: BTreeMap<Key, Viewer>,
        deployments: BTreeMap<Key, Deployment>,
        services: BTreeMap<Key, Service>,
        mutations: usize,
        list_failures: u32,
        delete_failures: u32,
        uid_counter: u64,
    }

    #[derive(Default)]
    pub(crate) struct FakeStore {
        state: Mutex<State>,
    }

    fn key(namespace: &str, name: &str) -> Key {
        (namespace.to_string(), name.to_string())
    }

    fn meta_key(meta: &ObjectMeta) -> Key {
        key(
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default(),
        )
    }

    fn controlled_by(meta: &ObjectMeta, uid: &str) -> bool {
        meta.owner_references
            .iter()
            .flatten()
            .any(|r| r.controller == Some(true) && r.uid == uid)
    }

    impl FakeStore {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Seed a Viewer, assigning a uid and a creation timestamp `age_secs` in the past
        pub(crate) fn add_viewer(&self, mut viewer: Viewer, age_secs: i64) -> Viewer {
            let mut state = self.state.lock().unwrap();
            state.uid_counter += 1;
            viewer.metadata.uid = Some(format!("uid-{}", state.uid_counter));
            viewer.metadata.creation_timestamp = Some(Time(
                chrono::Utc::now() - chrono::Duration::seconds(age_secs),
            ));
            state
                .viewers
                .insert(meta_key(&viewer.metadata), viewer.clone());
            viewer
        }

        pub(crate) fn insert_deployment(&self, deployment: Deployment) {
            let mut state = self.state.lock().unwrap();
            state
                .deployments
                .insert(meta_key(&deployment.metadata), deployment);
        }

        pub(crate) fn fail_next_lists(&self, count: u32) {
            self.state.lock().unwrap().list_failures = count;
        }

        pub(crate) fn fail_next_deletes(&self, count: u32) {
            self.state.lock().unwrap().delete_failures = count;
        }

        pub(crate) fn mutations(&self) -> usize {
            self.state.lock().unwrap().mutations
        }

        pub(crate) fn viewer_names(&self) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state.viewers.keys().map(|(_, name)| name.clone()).collect()
        }

        pub(crate) fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
            let state = self.state.lock().unwrap();
            state.deployments.get(&key(namespace, name)).cloned()
        }

        pub(crate) fn service(&self, namespace: &str, name: &str) -> Option<Service> {
            let state = self.state.lock().unwrap();
            state.services.get(&key(namespace, name)).cloned()
        }

        pub(crate) fn deployment_count(&self) -> usize {
            self.state.lock().unwrap().deployments.len()
        }
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn get_viewer(&self, namespace: &str, name: &str) -> Result<Option<Viewer>, Error> {
            let state = self.state.lock().unwrap();
            Ok(state.viewers.get(&key(namespace, name)).cloned())
        }

        async fn list_viewers(&self, namespace: &str) -> Result<Vec<Viewer>, Error> {
            let mut state = self.state.lock().unwrap();
            if state.list_failures > 0 {
                state.list_failures -= 1;
                return Err(Error::internal_with_context("fake", "list unavailable"));
            }
            Ok(state
                .viewers
                .iter()
                .filter(|((ns, _), _)| ns == namespace)
                .map(|(_, v)| v.clone())
                .collect())
        }

        async fn delete_viewer(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, Error> {
            let mut state = self.state.lock().unwrap();
            if state.delete_failures > 0 {
                state.delete_failures -= 1;
                return Err(Error::internal_with_context("fake", "delete unavailable"));
            }
            let Some(viewer) = state.viewers.remove(&key(namespace, name)) else {
                return Ok(DeleteOutcome::AlreadyGone);
            };
            state.mutations += 1;
            if let Some(uid) = viewer.metadata.uid {
                state
                    .deployments
                    .retain(|_, d| !controlled_by(&d.metadata, &uid));
                state
                    .services
                    .retain(|_, s| !controlled_by(&s.metadata, &uid));
            }
            Ok(DeleteOutcome::Deleted)
        }

        async fn get_deployment(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<Deployment>, Error> {
            Ok(self.deployment(namespace, name))
        }

        async fn create_deployment(&self, deployment: &Deployment) -> Result<CreateOutcome, Error> {
            let mut state = self.state.lock().unwrap();
            let k = meta_key(&deployment.metadata);
            if state.deployments.contains_key(&k) {
                return Ok(CreateOutcome::AlreadyExists);
            }
            state.deployments.insert(k, deployment.clone());
            state.mutations += 1;
            Ok(CreateOutcome::Created)
        }

        async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
            Ok(self.service(namespace, name))
        }

        async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error> {
            let mut state = self.state.lock().unwrap();
            let k = meta_key(&service.metadata);
            if state.services.contains_key(&k) {
                return Ok(CreateOutcome::AlreadyExists);
            }
            state.services.insert(k, service.clone());
            state.mutations += 1;
            Ok(CreateOutcome::Created)
        }
    }
}

//! Cluster access for schema-less eventing resources
//!
//! The topology managers never touch `kube::Api` directly. Everything goes
//! through [`ClusterApi`] so tests can swap in a mock or an in-memory cluster.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use lambda_common::FIELD_MANAGER;

use crate::document::Document;
use crate::error::{is_already_exists, is_not_found, EventingError};

/// Result of a create call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// Another writer created it first
    AlreadyExists,
}

/// Create, read, replace and delete operations on dynamic resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Document>, EventingError>;

    /// Create an object; AlreadyExists is reported, not raised
    async fn create(&self, document: &Document) -> Result<CreateOutcome, EventingError>;

    /// Replace an existing object; the document must carry its resourceVersion
    async fn replace(&self, document: &Document) -> Result<(), EventingError>;

    /// Delete an object, returning false when it was already gone
    async fn delete(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<bool, EventingError>;

    /// List objects matching a label selector
    async fn list(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Document>, EventingError>;
}

/// [`ClusterApi`] backed by the Kubernetes API server
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new KubeClusterApi
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, api_resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, api_resource)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Document>, EventingError> {
        let object = self.api(api_resource, namespace).get_opt(name).await?;
        Ok(object.map(|o| Document::from_object(o, api_resource.clone())))
    }

    async fn create(&self, document: &Document) -> Result<CreateOutcome, EventingError> {
        let api = self.api(document.api_resource(), document.namespace());
        match api.create(&post_params(), document.object()).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e) if is_already_exists(&e) => {
                debug!(
                    kind = %document.kind(),
                    name = %document.name(),
                    namespace = %document.namespace(),
                    "resource already exists"
                );
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(EventingError::apply(
                document.kind(),
                document.name(),
                document.namespace(),
                e,
            )),
        }
    }

    async fn replace(&self, document: &Document) -> Result<(), EventingError> {
        let api = self.api(document.api_resource(), document.namespace());
        api.replace(document.name(), &post_params(), document.object())
            .await
            .map_err(|e| {
                EventingError::apply(document.kind(), document.name(), document.namespace(), e)
            })?;
        Ok(())
    }

    async fn delete(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<bool, EventingError> {
        let api = self.api(api_resource, namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(EventingError::apply(&api_resource.kind, name, namespace, e)),
        }
    }

    async fn list(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Document>, EventingError> {
        let list = self
            .api(api_resource, namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list
            .items
            .into_iter()
            .map(|o| Document::from_object(o, api_resource.clone()))
            .collect())
    }
}

//! Shared topology for LambdaFunctions
//!
//! Every function in a namespace publishes through one broker and one DLQ.
//! Those are created on first use, carry no owner reference and are never
//! updated or deleted here, since other functions depend on them. Each
//! function owns exactly one trigger, which is garbage-collected with it.
//!
//! Check-then-create of the broker runs under a per-namespace lock. Across
//! replicas the lock does nothing; AlreadyExists from the API server is
//! treated as success instead.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use lambda_common::crd::{EventingSpec, LambdaFunction};
use lambda_common::kube_utils::controller_owner_ref;
use lambda_common::{
    LABEL_COMPONENT, LABEL_FUNCTION_NAME, LABEL_MANAGED_BY, LABEL_NAME, MANAGED_BY_VALUE,
};

use crate::applier::apply_documents;
use crate::client::ClusterApi;
use crate::config::EventingConfig;
use crate::document::Document;
use crate::error::EventingError;
use crate::lifecycle::{ensure, Drift, Ownership};
use crate::locks::NamespaceLocks;
use crate::naming::{
    component, function_trigger_name, shared_broker_name, SERVING_API_VERSION, SERVING_KIND,
    SHARED_DLQ_PREFIX, SHARED_OWNER_LABEL,
};
use crate::renderer::{BrokerData, DlqData, ManifestRenderer};
use crate::resource::{ResourceKind, PARALLELISM_ANNOTATION, PREFETCH_ANNOTATION};

/// Where a function's events are routed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionRouting {
    /// Shared broker the trigger subscribes to
    pub broker_name: String,
    /// The function's trigger
    pub trigger_name: String,
}

/// Provisioning and teardown of a function's eventing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FunctionTopology: Send + Sync {
    /// Ensure the namespace broker and DLQ exist and the function's trigger
    /// matches its spec. Returns `None` when eventing is disabled.
    async fn ensure_topology(
        &self,
        function: &LambdaFunction,
    ) -> Result<Option<FunctionRouting>, EventingError>;

    /// Delete the function's trigger; shared resources are left alone
    async fn teardown_topology(&self, function: &LambdaFunction) -> Result<(), EventingError>;
}

/// [`FunctionTopology`] over a shared namespace broker
pub struct SharedTopologyManager {
    api: Arc<dyn ClusterApi>,
    renderer: Arc<dyn ManifestRenderer>,
    config: EventingConfig,
    locks: NamespaceLocks,
}

impl SharedTopologyManager {
    /// Create a new SharedTopologyManager
    pub fn new(
        api: Arc<dyn ClusterApi>,
        renderer: Arc<dyn ManifestRenderer>,
        config: EventingConfig,
    ) -> Self {
        Self {
            api,
            renderer,
            config,
            locks: NamespaceLocks::new(),
        }
    }

    async fn ensure_shared_broker(
        &self,
        namespace: &str,
        broker_name: &str,
        spec: Option<&EventingSpec>,
    ) -> Result<(), EventingError> {
        let _guard = self.locks.lock(namespace).await;

        let broker_ar = ResourceKind::Broker.api_resource();
        if self.api.get(&broker_ar, namespace, broker_name).await?.is_some() {
            debug!(broker = %broker_name, namespace = %namespace, "shared broker present");
            return Ok(());
        }

        let rabbitmq = self.config.rabbitmq_for(spec);
        let dlq = self.config.dlq_for(spec);
        let dlq_enabled = dlq.enabled;

        // Render everything before touching the cluster, then apply the DLQ
        // ahead of the broker: a present broker is the provisioned marker
        let broker = self.renderer.render_broker(&BrokerData {
            name: broker_name.to_string(),
            namespace: namespace.to_string(),
            lambda_name: SHARED_OWNER_LABEL.to_string(),
            rabbitmq: rabbitmq.clone(),
            dlq: dlq.clone(),
        })?;
        let dlq_manifests = if dlq_enabled {
            Some(self.renderer.render_dlq(&DlqData {
                name: SHARED_DLQ_PREFIX.to_string(),
                namespace: namespace.to_string(),
                lambda_name: SHARED_OWNER_LABEL.to_string(),
                rabbitmq,
                dlq,
                monitoring: EventingConfig::monitoring_for(spec),
            })?)
        } else {
            None
        };

        if let Some(manifests) = &dlq_manifests {
            apply_documents(self.api.as_ref(), manifests, namespace).await?;
        }
        let created = apply_documents(self.api.as_ref(), &broker, namespace).await?;

        info!(
            broker = %broker_name,
            namespace = %namespace,
            created,
            dlq = dlq_enabled,
            "provisioned shared broker"
        );
        Ok(())
    }

    fn function_trigger(
        &self,
        function: &LambdaFunction,
        namespace: &str,
        broker_name: &str,
    ) -> Document {
        let name = function.name_any();
        let rabbitmq = self.config.rabbitmq_for(function.spec.eventing.as_ref());

        let mut spec = json!({
            "broker": broker_name,
            "subscriber": {
                "ref": {
                    "apiVersion": SERVING_API_VERSION,
                    "kind": SERVING_KIND,
                    "name": name,
                    "namespace": namespace,
                }
            }
        });
        if !function.is_receiver() {
            spec["filter"] = json!({ "attributes": { "subject": name } });
        }

        Document::new(ResourceKind::Trigger, &function_trigger_name(&name), namespace)
            .with_labels([
                (LABEL_NAME, name.as_str()),
                (LABEL_COMPONENT, component::TRIGGER),
                (LABEL_MANAGED_BY, MANAGED_BY_VALUE),
                (LABEL_FUNCTION_NAME, name.as_str()),
            ])
            .with_annotation(PARALLELISM_ANNOTATION, &rabbitmq.parallelism.to_string())
            .with_annotation(PREFETCH_ANNOTATION, &rabbitmq.prefetch_count.to_string())
            .with_spec(spec)
    }
}

fn namespace_of(function: &LambdaFunction) -> Result<String, EventingError> {
    function
        .namespace()
        .ok_or_else(|| EventingError::MissingNamespace {
            kind: "LambdaFunction".to_string(),
            name: function.name_any(),
        })
}

#[async_trait]
impl FunctionTopology for SharedTopologyManager {
    #[instrument(skip(self, function), fields(function = %function.name_any()))]
    async fn ensure_topology(
        &self,
        function: &LambdaFunction,
    ) -> Result<Option<FunctionRouting>, EventingError> {
        if !function.eventing_enabled() {
            debug!("eventing disabled, skipping topology");
            return Ok(None);
        }

        let namespace = namespace_of(function)?;
        let spec = function.spec.eventing.as_ref();
        let broker_name = shared_broker_name(spec.and_then(|s| s.broker_name.as_deref()));

        self.ensure_shared_broker(&namespace, &broker_name, spec)
            .await?;

        let owner = controller_owner_ref(function).map_err(EventingError::OwnerReference)?;
        let trigger = self.function_trigger(function, &namespace, &broker_name);
        let trigger_name = trigger.name().to_string();
        let outcome = ensure(
            self.api.as_ref(),
            trigger,
            Ownership::Owned(owner),
            Drift::Replace,
        )
        .await?;
        debug!(trigger = %trigger_name, ?outcome, "function trigger reconciled");

        Ok(Some(FunctionRouting {
            broker_name,
            trigger_name,
        }))
    }

    #[instrument(skip(self, function), fields(function = %function.name_any()))]
    async fn teardown_topology(&self, function: &LambdaFunction) -> Result<(), EventingError> {
        let namespace = namespace_of(function)?;
        let trigger_name = function_trigger_name(&function.name_any());
        let deleted = self
            .api
            .delete(
                &ResourceKind::Trigger.api_resource(),
                &namespace,
                &trigger_name,
            )
            .await?;
        if deleted {
            info!(trigger = %trigger_name, namespace = %namespace, "deleted function trigger");
        } else {
            debug!(trigger = %trigger_name, "function trigger already gone");
        }
        Ok(())
    }
}

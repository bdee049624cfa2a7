//! Dedicated topology for LambdaAgents
//!
//! Each agent owns a private RabbitMQ-backed broker plus one trigger per
//! subscription and one per forwarded (target, event type) pair. Forward
//! triggers deliver to the target agent's broker ingress by absolute URI, so
//! the target may live in any namespace.
//!
//! Broker and broker config are create-only: the RabbitMQ broker rejects
//! config changes after creation. Triggers follow the spec and are pruned
//! when a subscription or forward is removed.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use lambda_common::crd::{AgentEventingSpec, AgentEventingStatus, LambdaAgent};
use lambda_common::kube_utils::controller_owner_ref;
use lambda_common::{
    LABEL_COMPONENT, LABEL_EVENT_TYPE, LABEL_MANAGED_BY, LABEL_NAME, LABEL_TARGET_AGENT,
    LABEL_TARGET_NAMESPACE, MANAGED_BY_VALUE,
};

use crate::client::ClusterApi;
use crate::config::EventingConfig;
use crate::document::Document;
use crate::error::EventingError;
use crate::lifecycle::{ensure, Drift, Ownership};
use crate::locks::NamespaceLocks;
use crate::naming::{
    agent_broker_config_name, agent_broker_name, broker_ingress_uri, component,
    forward_trigger_name, inbound_trigger_name, sanitize_event_type, SERVING_API_VERSION,
    SERVING_KIND,
};
use crate::resource::{
    ResourceKind, BROKER_CLASS_ANNOTATION, BROKER_CONFIG_API_VERSION, RABBITMQ_BROKER_CLASS,
};

/// Triggers provisioned for an agent
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentRouting {
    /// The agent's broker
    pub broker_name: String,
    /// Inbound trigger names, in subscription order
    pub inbound: Vec<String>,
    /// Forward trigger names, in forward then event-type order
    pub forwards: Vec<String>,
    /// Stale triggers deleted during this pass
    pub pruned: usize,
}

/// What a teardown removed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AgentTeardown {
    /// Triggers deleted
    pub triggers: usize,
    /// Channels deleted
    pub channels: usize,
}

/// Provisioning, teardown and status of an agent's eventing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AgentTopology: Send + Sync {
    /// Ensure broker, inbound and forward triggers. Returns `None` when the
    /// agent has no enabled eventing block.
    async fn ensure_agent_topology(
        &self,
        agent: &LambdaAgent,
    ) -> Result<Option<AgentRouting>, EventingError>;

    /// Delete the agent's triggers and channels. The broker config stays.
    async fn teardown_agent_topology(
        &self,
        agent: &LambdaAgent,
    ) -> Result<AgentTeardown, EventingError>;

    /// Read the agent's broker readiness and trigger counts
    async fn agent_status(&self, agent: &LambdaAgent) -> Result<AgentEventingStatus, EventingError>;
}

/// [`AgentTopology`] with a broker per agent
pub struct DedicatedTopologyManager {
    api: Arc<dyn ClusterApi>,
    config: EventingConfig,
    locks: NamespaceLocks,
}

struct AgentRef<'a> {
    name: String,
    namespace: String,
    uid: Option<String>,
    agent: &'a LambdaAgent,
}

impl<'a> AgentRef<'a> {
    fn new(agent: &'a LambdaAgent) -> Result<Self, EventingError> {
        let name = agent.name_any();
        let namespace = agent
            .namespace()
            .ok_or_else(|| EventingError::MissingNamespace {
                kind: "LambdaAgent".to_string(),
                name: name.clone(),
            })?;
        Ok(Self {
            name,
            namespace,
            uid: agent.uid(),
            agent,
        })
    }

    fn owner(&self) -> Result<OwnerReference, EventingError> {
        controller_owner_ref(self.agent).map_err(EventingError::OwnerReference)
    }

    fn selector(&self) -> String {
        format!("{LABEL_NAME}={}", self.name)
    }

    /// Only objects this agent controls; a function sharing the agent's name
    /// carries the same name label
    fn owns(&self, document: &Document) -> bool {
        self.uid.as_deref().is_some_and(|uid| document.is_owned_by(uid))
    }
}

impl DedicatedTopologyManager {
    /// Create a new DedicatedTopologyManager
    pub fn new(api: Arc<dyn ClusterApi>, config: EventingConfig) -> Self {
        Self {
            api,
            config,
            locks: NamespaceLocks::new(),
        }
    }

    async fn ensure_broker(
        &self,
        agent: &AgentRef<'_>,
        eventing: &AgentEventingSpec,
        owner: &OwnerReference,
    ) -> Result<String, EventingError> {
        let broker_name = agent_broker_name(&agent.name);
        let _guard = self.locks.lock(&agent.namespace).await;

        let broker_ar = ResourceKind::Broker.api_resource();
        if self
            .api
            .get(&broker_ar, &agent.namespace, &broker_name)
            .await?
            .is_some()
        {
            debug!(broker = %broker_name, "agent broker present");
            return Ok(broker_name);
        }

        let config_name = agent_broker_config_name(&agent.name);
        let broker_config = self.broker_config(agent, &config_name, eventing);
        ensure(
            self.api.as_ref(),
            broker_config,
            Ownership::Owned(owner.clone()),
            Drift::Ignore,
        )
        .await?;

        let broker = Document::new(ResourceKind::Broker, &broker_name, &agent.namespace)
            .with_labels(base_labels(&agent.name, component::BROKER))
            .with_annotation(BROKER_CLASS_ANNOTATION, RABBITMQ_BROKER_CLASS)
            .with_spec(json!({
                "config": {
                    "apiVersion": BROKER_CONFIG_API_VERSION,
                    "kind": ResourceKind::RabbitmqBrokerConfig.kind(),
                    "name": config_name,
                }
            }));
        ensure(
            self.api.as_ref(),
            broker,
            Ownership::Owned(owner.clone()),
            Drift::Ignore,
        )
        .await?;

        info!(broker = %broker_name, namespace = %agent.namespace, "provisioned agent broker");
        Ok(broker_name)
    }

    fn broker_config(
        &self,
        agent: &AgentRef<'_>,
        config_name: &str,
        eventing: &AgentEventingSpec,
    ) -> Document {
        let mut rabbitmq = self.config.rabbitmq.clone();
        if let Some(rmq) = &eventing.rabbitmq {
            if let Some(cluster) = rmq.cluster_name.as_ref().filter(|c| !c.is_empty()) {
                rabbitmq.cluster_name = cluster.clone();
            }
            if let Some(ns) = rmq.namespace.as_ref().filter(|n| !n.is_empty()) {
                rabbitmq.namespace = ns.clone();
            }
        }

        Document::new(
            ResourceKind::RabbitmqBrokerConfig,
            config_name,
            &agent.namespace,
        )
        .with_labels(base_labels(&agent.name, component::BROKER_CONFIG))
        .with_spec(json!({
            "rabbitmqClusterReference": {
                "name": rabbitmq.cluster_name,
                "namespace": rabbitmq.namespace,
            },
            "queueType": rabbitmq.queue_type,
        }))
    }

    /// Desired inbound and forward triggers, first one wins on a name clash
    fn desired_triggers(
        &self,
        agent: &AgentRef<'_>,
        eventing: &AgentEventingSpec,
        broker_name: &str,
    ) -> (Vec<Document>, Vec<Document>) {
        let mut seen = BTreeSet::new();
        let mut keep = |doc: &Document, event_type: &str| {
            if seen.insert(doc.name().to_string()) {
                true
            } else {
                warn!(
                    agent = %agent.name,
                    trigger = %doc.name(),
                    event_type = %event_type,
                    "trigger name already taken by another rule, skipping"
                );
                false
            }
        };

        let mut inbound = Vec::new();
        for sub in &eventing.subscriptions {
            let mut attributes = Map::new();
            attributes.insert("type".to_string(), Value::from(sub.event_type.as_str()));
            if let Some(source) = sub.source.as_ref().filter(|s| !s.is_empty()) {
                attributes.insert("source".to_string(), Value::from(source.as_str()));
            }

            let sanitized = sanitize_event_type(&sub.event_type);
            let doc = Document::new(
                ResourceKind::Trigger,
                &inbound_trigger_name(&agent.name, &sub.event_type),
                &agent.namespace,
            )
            .with_labels(base_labels(&agent.name, component::TRIGGER))
            .with_label(LABEL_EVENT_TYPE, &sanitized)
            .with_spec(json!({
                "broker": broker_name,
                "filter": { "attributes": attributes },
                "subscriber": {
                    "ref": {
                        "apiVersion": SERVING_API_VERSION,
                        "kind": SERVING_KIND,
                        "name": agent.name,
                        "namespace": agent.namespace,
                    }
                }
            }));
            if keep(&doc, &sub.event_type) {
                inbound.push(doc);
            }
        }

        let mut forwards = Vec::new();
        for fwd in &eventing.forwards {
            let uri = broker_ingress_uri(&fwd.target_agent, &fwd.target_namespace);
            for event_type in &fwd.event_types {
                let doc = Document::new(
                    ResourceKind::Trigger,
                    &forward_trigger_name(&agent.name, &fwd.target_agent, event_type),
                    &agent.namespace,
                )
                .with_labels(base_labels(&agent.name, component::TRIGGER_FORWARD))
                .with_labels([
                    (LABEL_TARGET_AGENT, fwd.target_agent.as_str()),
                    (LABEL_TARGET_NAMESPACE, fwd.target_namespace.as_str()),
                ])
                .with_spec(json!({
                    "broker": broker_name,
                    "filter": { "attributes": { "type": event_type } },
                    "subscriber": { "uri": uri }
                }));
                if keep(&doc, event_type) {
                    forwards.push(doc);
                }
            }
        }

        (inbound, forwards)
    }

    /// Delete every object of `kind` labelled for the agent, except `keep`
    async fn delete_labelled(
        &self,
        agent: &AgentRef<'_>,
        kind: ResourceKind,
        scope: Scope,
        keep: &BTreeSet<String>,
    ) -> Result<usize, EventingError> {
        let ar = kind.api_resource();
        let existing = self
            .api
            .list(&ar, &agent.namespace, &agent.selector())
            .await?;

        let mut deleted = 0;
        for doc in existing.iter().filter(|d| {
            !keep.contains(d.name()) && (scope == Scope::Labelled || agent.owns(d))
        }) {
            if self.api.delete(&ar, &agent.namespace, doc.name()).await? {
                debug!(kind = %kind, name = %doc.name(), "deleted");
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Which labelled objects a deletion may touch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    /// Only objects whose owner reference is the agent
    Owned,
    /// Anything carrying the agent's name label
    Labelled,
}

fn base_labels<'a>(agent: &'a str, component: &'a str) -> [(&'a str, &'a str); 3] {
    [
        (LABEL_NAME, agent),
        (LABEL_COMPONENT, component),
        (LABEL_MANAGED_BY, MANAGED_BY_VALUE),
    ]
}

#[async_trait]
impl AgentTopology for DedicatedTopologyManager {
    #[instrument(skip(self, agent), fields(agent = %agent.name_any()))]
    async fn ensure_agent_topology(
        &self,
        agent: &LambdaAgent,
    ) -> Result<Option<AgentRouting>, EventingError> {
        let Some(eventing) = agent.active_eventing() else {
            debug!("eventing not enabled, skipping topology");
            return Ok(None);
        };

        let agent_ref = AgentRef::new(agent)?;
        let owner = agent_ref.owner()?;
        let broker_name = self.ensure_broker(&agent_ref, eventing, &owner).await?;

        let (inbound, forwards) = self.desired_triggers(&agent_ref, eventing, &broker_name);
        let mut routing = AgentRouting {
            broker_name,
            ..Default::default()
        };

        for doc in inbound {
            routing.inbound.push(doc.name().to_string());
            ensure(
                self.api.as_ref(),
                doc,
                Ownership::Owned(owner.clone()),
                Drift::Replace,
            )
            .await?;
        }
        for doc in forwards {
            routing.forwards.push(doc.name().to_string());
            ensure(
                self.api.as_ref(),
                doc,
                Ownership::Owned(owner.clone()),
                Drift::Replace,
            )
            .await?;
        }

        let desired: BTreeSet<String> = routing
            .inbound
            .iter()
            .chain(&routing.forwards)
            .cloned()
            .collect();
        routing.pruned = self
            .delete_labelled(&agent_ref, ResourceKind::Trigger, Scope::Owned, &desired)
            .await?;

        info!(
            inbound = routing.inbound.len(),
            forwards = routing.forwards.len(),
            pruned = routing.pruned,
            "agent topology reconciled"
        );
        Ok(Some(routing))
    }

    #[instrument(skip(self, agent), fields(agent = %agent.name_any()))]
    async fn teardown_agent_topology(
        &self,
        agent: &LambdaAgent,
    ) -> Result<AgentTeardown, EventingError> {
        let agent_ref = AgentRef::new(agent)?;
        let none = BTreeSet::new();

        let triggers = self
            .delete_labelled(&agent_ref, ResourceKind::Trigger, Scope::Owned, &none)
            .await?;

        let channels = match self
            .delete_labelled(&agent_ref, ResourceKind::Channel, Scope::Labelled, &none)
            .await
        {
            Ok(n) => n,
            Err(e) if e.is_not_found() => {
                debug!("channel API not installed, nothing to delete");
                0
            }
            Err(e) => return Err(e),
        };

        info!(triggers, channels, "agent topology torn down");
        Ok(AgentTeardown { triggers, channels })
    }

    async fn agent_status(&self, agent: &LambdaAgent) -> Result<AgentEventingStatus, EventingError> {
        let agent_ref = AgentRef::new(agent)?;
        let broker_name = agent_broker_name(&agent_ref.name);

        let broker = self
            .api
            .get(
                &ResourceKind::Broker.api_resource(),
                &agent_ref.namespace,
                &broker_name,
            )
            .await?;
        let (broker_ready, broker_url) = match &broker {
            Some(b) => (
                b.condition_is_true("Ready"),
                b.field(&["status", "address", "url"])
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            None => (false, None),
        };

        let triggers = self
            .api
            .list(
                &ResourceKind::Trigger.api_resource(),
                &agent_ref.namespace,
                &agent_ref.selector(),
            )
            .await?;
        let owned: Vec<&Document> = triggers.iter().filter(|t| agent_ref.owns(t)).collect();
        let forward_count = owned
            .iter()
            .filter(|t| t.label(LABEL_COMPONENT) == Some(component::TRIGGER_FORWARD))
            .count();

        Ok(AgentEventingStatus {
            broker_name,
            broker_ready,
            broker_url,
            trigger_count: u32::try_from(owned.len()).unwrap_or(u32::MAX),
            forward_count: u32::try_from(forward_count).unwrap_or(u32::MAX),
        })
    }
}

//! LambdaAgent controller
//!
//! Provisions the agent's dedicated broker, inbound and forward triggers, then
//! reads the broker back into `status.eventingStatus`. Agents whose broker is
//! not Ready yet are polled at the retry interval until it is.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use lambda_common::crd::{
    AgentEventingStatus, LambdaAgent, LambdaAgentStatus, AGENT_FINALIZER,
};
use lambda_common::kube_utils::has_finalizer;
use lambda_eventing::AgentTopology;

use super::{
    add_finalizer, conditions_match, eventing_condition, patch_status, reason, remove_finalizer,
    upsert_condition, FINALIZER_REQUEUE, RESYNC_INTERVAL, RETRY_INTERVAL,
};
use crate::Error;

/// Writes the controller makes to LambdaAgent objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AgentKubeClient: Send + Sync {
    /// Add the teardown finalizer
    async fn add_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Remove the teardown finalizer
    async fn remove_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &LambdaAgentStatus,
    ) -> Result<(), Error>;
}

/// [`AgentKubeClient`] backed by the API server
pub struct AgentKubeClientImpl {
    client: Client,
}

impl AgentKubeClientImpl {
    /// Create a new AgentKubeClientImpl
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<LambdaAgent> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl AgentKubeClient for AgentKubeClientImpl {
    async fn add_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        add_finalizer(&self.api(namespace), name, AGENT_FINALIZER).await
    }

    async fn remove_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        remove_finalizer(&self.api(namespace), name, AGENT_FINALIZER).await
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &LambdaAgentStatus,
    ) -> Result<(), Error> {
        patch_status(&self.api(namespace), name, status, &["eventingStatus"]).await
    }
}

/// Shared context for the LambdaAgent controller
pub struct AgentContext {
    /// LambdaAgent writes
    pub kube: Arc<dyn AgentKubeClient>,
    /// Dedicated broker and trigger provisioning
    pub topology: Arc<dyn AgentTopology>,
}

impl AgentContext {
    /// Create a context talking to the API server
    pub fn new(client: Client, topology: Arc<dyn AgentTopology>) -> Self {
        Self {
            kube: Arc::new(AgentKubeClientImpl::new(client)),
            topology,
        }
    }

    /// Create a context from explicit clients
    pub fn with_clients(kube: Arc<dyn AgentKubeClient>, topology: Arc<dyn AgentTopology>) -> Self {
        Self { kube, topology }
    }
}

/// Reconcile a LambdaAgent
#[instrument(skip(agent, ctx), fields(agent = %agent.name_any()))]
pub async fn reconcile(agent: Arc<LambdaAgent>, ctx: Arc<AgentContext>) -> Result<Action, Error> {
    let name = agent.name_any();
    let namespace = agent.namespace().ok_or_else(|| Error::MissingNamespace {
        kind: "LambdaAgent",
        name: name.clone(),
    })?;

    if agent.metadata.deletion_timestamp.is_some() {
        if !has_finalizer(agent.as_ref(), AGENT_FINALIZER) {
            return Ok(Action::await_change());
        }
        let removed = ctx.topology.teardown_agent_topology(&agent).await?;
        ctx.kube.remove_finalizer(&name, &namespace).await?;
        info!(
            triggers = removed.triggers,
            channels = removed.channels,
            "agent eventing torn down, finalizer removed"
        );
        return Ok(Action::await_change());
    }

    if !has_finalizer(agent.as_ref(), AGENT_FINALIZER) {
        info!("adding finalizer");
        ctx.kube.add_finalizer(&name, &namespace).await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    if let Err(message) = agent.validate() {
        let err = lambda_common::Error::validation_for(&name, message);
        warn!(error = %err, "agent validation failed");
        let message = err.to_string();
        let status = desired_status(&agent, None, false, reason::VALIDATION_FAILED, &message);
        update_status(&agent, &ctx, &name, &namespace, status).await?;
        return Ok(Action::await_change());
    }

    let routing = match ctx.topology.ensure_agent_topology(&agent).await {
        Ok(routing) => routing,
        Err(e) => {
            let status = desired_status(&agent, None, false, reason::EVENTING_FAILED, &e.to_string());
            if let Err(patch_err) = update_status(&agent, &ctx, &name, &namespace, status).await {
                warn!(error = %patch_err, "failed to record eventing failure on status");
            }
            return Err(e.into());
        }
    };

    let Some(routing) = routing else {
        // remove triggers and channels left from when eventing was on
        let removed = ctx.topology.teardown_agent_topology(&agent).await?;
        if removed.triggers + removed.channels > 0 {
            info!(
                triggers = removed.triggers,
                channels = removed.channels,
                "eventing disabled, removed agent routing"
            );
        }
        let status = desired_status(
            &agent,
            None,
            false,
            reason::EVENTING_DISABLED,
            "eventing disabled in spec",
        );
        update_status(&agent, &ctx, &name, &namespace, status).await?;
        return Ok(Action::requeue(RESYNC_INTERVAL));
    };

    let eventing = ctx.topology.agent_status(&agent).await?;
    let broker_ready = eventing.broker_ready;
    let message = format!(
        "broker {} with {} inbound and {} forward triggers",
        routing.broker_name,
        routing.inbound.len(),
        routing.forwards.len()
    );
    let status = desired_status(
        &agent,
        Some(eventing),
        true,
        reason::TOPOLOGY_READY,
        &message,
    );
    update_status(&agent, &ctx, &name, &namespace, status).await?;

    if broker_ready {
        Ok(Action::requeue(RESYNC_INTERVAL))
    } else {
        debug!(broker = %routing.broker_name, "broker not ready yet");
        Ok(Action::requeue(RETRY_INTERVAL))
    }
}

fn desired_status(
    agent: &LambdaAgent,
    eventing: Option<AgentEventingStatus>,
    ready: bool,
    reason: &str,
    message: &str,
) -> LambdaAgentStatus {
    let existing = agent
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    LambdaAgentStatus {
        eventing_status: eventing,
        observed_generation: agent.metadata.generation,
        conditions: upsert_condition(existing, eventing_condition(ready, reason, message)),
    }
}

async fn update_status(
    agent: &LambdaAgent,
    ctx: &AgentContext,
    name: &str,
    namespace: &str,
    status: LambdaAgentStatus,
) -> Result<(), Error> {
    if let Some(current) = &agent.status {
        if current.eventing_status == status.eventing_status
            && current.observed_generation == status.observed_generation
            && conditions_match(&current.conditions, &status.conditions)
        {
            debug!("status unchanged, skipping patch");
            return Ok(());
        }
    }
    ctx.kube.patch_status(name, namespace, &status).await
}

/// Error policy for the LambdaAgent controller
pub fn error_policy(agent: Arc<LambdaAgent>, error: &Error, _ctx: Arc<AgentContext>) -> Action {
    error!(
        ?error,
        agent = %agent.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(RETRY_INTERVAL)
    } else {
        Action::await_change()
    }
}

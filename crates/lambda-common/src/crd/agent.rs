//! LambdaAgent CRD: long-lived AI agents with a dedicated broker
//!
//! Each agent owns its broker, one inbound trigger per subscription, and one
//! forward trigger per (target agent, event type) pair. Forward triggers
//! deliver to the target agent's broker ingress in another namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use super::DNS_LABEL_MAX_LEN;
use crate::naming::{forward_trigger_name, inbound_trigger_name};

/// Finalizer guarding trigger and channel teardown for a LambdaAgent
pub const AGENT_FINALIZER: &str = "lambdaagent.lambda.knative.io/finalizer";

// =============================================================================
// CRD
// =============================================================================

/// Spec for a LambdaAgent
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lambda.knative.io",
    version = "v1alpha1",
    kind = "LambdaAgent",
    plural = "lambdaagents",
    shortname = "la",
    namespaced,
    status = "LambdaAgentStatus",
    printcolumn = r#"{"name":"Broker","type":"string","jsonPath":".status.eventingStatus.brokerName"}"#,
    printcolumn = r#"{"name":"BrokerReady","type":"boolean","jsonPath":".status.eventingStatus.brokerReady"}"#,
    printcolumn = r#"{"name":"Triggers","type":"integer","jsonPath":".status.eventingStatus.triggerCount"}"#,
    printcolumn = r#"{"name":"Forwards","type":"integer","jsonPath":".status.eventingStatus.forwardCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LambdaAgentSpec {
    /// Eventing configuration; no topology is provisioned when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eventing: Option<AgentEventingSpec>,
}

/// Eventing configuration for an agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentEventingSpec {
    /// Provision the agent's broker and triggers (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// CloudEvents source this agent stamps on emitted events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,

    /// Event types this agent emits
    #[serde(default)]
    pub intents: Vec<String>,

    /// Event types this agent receives
    #[serde(default)]
    pub subscriptions: Vec<AgentSubscription>,

    /// Event types relayed to agents in other namespaces
    #[serde(default)]
    pub forwards: Vec<AgentForward>,

    /// RabbitMQ cluster backing the agent's broker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rabbitmq: Option<AgentRabbitMqSpec>,
}

/// An inbound event subscription
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSubscription {
    /// CloudEvents type attribute to match
    pub event_type: String,

    /// Optional CloudEvents source attribute to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A cross-namespace forwarding rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentForward {
    /// CloudEvents types to relay
    pub event_types: Vec<String>,

    /// Agent receiving the relayed events
    pub target_agent: String,

    /// Namespace of the target agent
    pub target_namespace: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// RabbitMQ cluster reference for an agent broker
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRabbitMqSpec {
    /// RabbitmqCluster name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    /// RabbitmqCluster namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of a LambdaAgent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LambdaAgentStatus {
    /// Observed eventing topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eventing_status: Option<AgentEventingStatus>,
    /// Last observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Read model of an agent's eventing topology
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentEventingStatus {
    /// Name of the agent's broker
    pub broker_name: String,
    /// Whether the broker reports Ready=True
    #[serde(default)]
    pub broker_ready: bool,
    /// Broker ingress address, once assigned
    #[serde(default, rename = "brokerURL", skip_serializing_if = "Option::is_none")]
    pub broker_url: Option<String>,
    /// Triggers labelled for this agent (inbound and forward)
    #[serde(default)]
    pub trigger_count: u32,
    /// Forward triggers among them
    #[serde(default)]
    pub forward_count: u32,
}

impl AgentEventingStatus {
    /// Inbound triggers (all triggers minus forwards)
    pub fn inbound_count(&self) -> u32 {
        self.trigger_count.saturating_sub(self.forward_count)
    }
}

// =============================================================================
// Helpers
// =============================================================================

impl LambdaAgent {
    /// Eventing configuration when present and not switched off
    pub fn active_eventing(&self) -> Option<&AgentEventingSpec> {
        self.spec
            .eventing
            .as_ref()
            .filter(|e| e.enabled.unwrap_or(true))
    }
}

impl LambdaAgent {
    /// Validate the spec and the trigger names it expands to under this
    /// agent's name
    pub fn validate(&self) -> Result<(), String> {
        self.spec.validate()?;

        let Some(eventing) = &self.spec.eventing else {
            return Ok(());
        };
        let agent = self.metadata.name.as_deref().unwrap_or_default();

        for (i, sub) in eventing.subscriptions.iter().enumerate() {
            check_trigger_name(
                &inbound_trigger_name(agent, &sub.event_type),
                &format!("subscriptions[{i}]"),
            )?;
        }
        for (i, fwd) in eventing.forwards.iter().enumerate() {
            for event_type in &fwd.event_types {
                check_trigger_name(
                    &forward_trigger_name(agent, &fwd.target_agent, event_type),
                    &format!("forwards[{i}]"),
                )?;
            }
        }
        Ok(())
    }
}

fn check_trigger_name(name: &str, field: &str) -> Result<(), String> {
    if name.len() > DNS_LABEL_MAX_LEN {
        return Err(format!(
            "{field} expands to trigger name '{name}' longer than {DNS_LABEL_MAX_LEN} characters"
        ));
    }
    Ok(())
}

impl LambdaAgentSpec {
    /// Validate the spec
    pub fn validate(&self) -> Result<(), String> {
        let Some(eventing) = &self.eventing else {
            return Ok(());
        };

        for (i, sub) in eventing.subscriptions.iter().enumerate() {
            if sub.event_type.trim().is_empty() {
                return Err(format!("subscriptions[{i}].eventType cannot be empty"));
            }
        }

        for (i, fwd) in eventing.forwards.iter().enumerate() {
            super::validate_dns_label(&fwd.target_agent, &format!("forwards[{i}].targetAgent"))?;
            super::validate_dns_label(
                &fwd.target_namespace,
                &format!("forwards[{i}].targetNamespace"),
            )?;
            if fwd.event_types.is_empty() {
                return Err(format!("forwards[{i}].eventTypes needs at least one entry"));
            }
            if fwd.event_types.iter().any(|t| t.trim().is_empty()) {
                return Err(format!("forwards[{i}].eventTypes cannot contain empty types"));
            }
        }

        Ok(())
    }
}

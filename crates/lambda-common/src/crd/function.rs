//! LambdaFunction CRD: short-lived compute units fed by a shared namespace broker
//!
//! Only the eventing surface is modelled here. Every function in a namespace
//! routes through one shared broker and DLQ; the function itself owns a single
//! trigger.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Finalizer guarding trigger teardown for a LambdaFunction
pub const FUNCTION_FINALIZER: &str = "lambdafunction.lambda.knative.io/finalizer";

const QUEUE_TYPES: &[&str] = &["classic", "quorum"];
const OVERFLOW_POLICIES: &[&str] = &["drop-head", "reject-publish"];

// =============================================================================
// CRD
// =============================================================================

/// Spec for a LambdaFunction
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lambda.knative.io",
    version = "v1alpha1",
    kind = "LambdaFunction",
    plural = "lambdafunctions",
    shortname = "lf",
    namespaced,
    status = "LambdaFunctionStatus",
    printcolumn = r#"{"name":"Broker","type":"string","jsonPath":".status.brokerName"}"#,
    printcolumn = r#"{"name":"Trigger","type":"string","jsonPath":".status.triggerName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LambdaFunctionSpec {
    /// Eventing configuration; eventing is enabled when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eventing: Option<EventingSpec>,
}

/// Eventing configuration for a function
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventingSpec {
    /// Set to false to skip broker and trigger provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Broker to route through instead of the namespace default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_name: Option<String>,

    /// RabbitMQ tuning for the broker and this function's trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rabbitmq: Option<RabbitMqSpec>,

    /// Dead-letter queue overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq: Option<DlqSpec>,

    /// Monitoring for the dead-letter queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSpec>,
}

/// RabbitMQ cluster and dispatcher tuning
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RabbitMqSpec {
    /// Name of the RabbitmqCluster backing the broker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    /// Namespace of the RabbitmqCluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Queue type: classic or quorum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_type: Option<String>,

    /// Concurrent deliveries per trigger dispatcher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,

    /// Messages prefetched from RabbitMQ before acks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch_count: Option<u32>,
}

/// Dead-letter queue overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DlqSpec {
    /// Set to false to provision the broker without a DLQ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// DLQ exchange name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_name: Option<String>,

    /// DLQ queue name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,

    /// Routing key prefix for dead-lettered events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key_prefix: Option<String>,

    /// Delivery attempts before an event is dead-lettered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max_attempts: Option<u32>,

    /// Initial retry backoff as an ISO 8601 duration (e.g., PT1S)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff_delay: Option<String>,

    /// Message TTL in milliseconds
    #[serde(
        default,
        rename = "messageTTL",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_ttl: Option<u64>,

    /// Maximum number of messages held in the DLQ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,

    /// Overflow behaviour when the DLQ is full: drop-head or reject-publish
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow_policy: Option<String>,

    /// Periodic cleanup of dead-lettered messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<DlqCleanupSpec>,
}

/// DLQ cleanup policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DlqCleanupSpec {
    /// Enable automatic cleanup
    #[serde(default)]
    pub enabled: bool,

    /// How often cleanup runs (e.g., 1h)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// How long dead-lettered messages are kept (e.g., 168h)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,
}

/// Monitoring toggle
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    /// Emit monitoring resources alongside the DLQ
    #[serde(default)]
    pub enabled: bool,
}

// =============================================================================
// Status
// =============================================================================

/// Status of a LambdaFunction
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LambdaFunctionStatus {
    /// Broker the function's trigger subscribes to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_name: Option<String>,
    /// Name of the function's trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_name: Option<String>,
    /// Last observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// =============================================================================
// Helpers
// =============================================================================

impl LambdaFunction {
    /// Whether broker and trigger should be provisioned
    pub fn eventing_enabled(&self) -> bool {
        self.spec
            .eventing
            .as_ref()
            .and_then(|e| e.enabled)
            .unwrap_or(true)
    }

    /// Whether the function receives every broker event unfiltered
    pub fn is_receiver(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(crate::RECEIVER_MODE_ANNOTATION))
            .is_some_and(|v| v == "true")
    }
}

impl LambdaFunctionSpec {
    /// Validate the spec
    pub fn validate(&self) -> Result<(), String> {
        let Some(eventing) = &self.eventing else {
            return Ok(());
        };

        if let Some(broker) = &eventing.broker_name {
            super::validate_dns_label(broker, "brokerName")?;
        }

        if let Some(rmq) = &eventing.rabbitmq {
            if let Some(queue_type) = &rmq.queue_type {
                if !queue_type.is_empty() && !QUEUE_TYPES.contains(&queue_type.as_str()) {
                    return Err(format!(
                        "rabbitmq.queueType must be one of {QUEUE_TYPES:?}, got '{queue_type}'"
                    ));
                }
            }
        }

        if let Some(dlq) = &eventing.dlq {
            if let Some(policy) = &dlq.overflow_policy {
                if !policy.is_empty() && !OVERFLOW_POLICIES.contains(&policy.as_str()) {
                    return Err(format!(
                        "dlq.overflowPolicy must be one of {OVERFLOW_POLICIES:?}, got '{policy}'"
                    ));
                }
            }
        }

        Ok(())
    }
}

//! Deterministic names for generated eventing resources
//!
//! Every name is a pure function of the owner and the filter it routes, so
//! re-reconciling an object always lands on the same resources.

pub use lambda_common::naming::{forward_trigger_name, inbound_trigger_name, sanitize_event_type};

/// Default shared broker name in a namespace
pub const SHARED_BROKER_NAME: &str = "lambda-broker";

/// Name prefix for the shared dead-letter queue resources
pub const SHARED_DLQ_PREFIX: &str = "lambda-dlq";

/// LambdaName used when rendering shared broker and DLQ manifests
pub const SHARED_OWNER_LABEL: &str = "shared";

/// Knative Serving apiVersion of the subscriber Service
pub const SERVING_API_VERSION: &str = "serving.knative.dev/v1";

/// Knative Serving kind of the subscriber Service
pub const SERVING_KIND: &str = "Service";

/// Component label values
pub mod component {
    /// Function and inbound agent triggers
    pub const TRIGGER: &str = "trigger";
    /// Cross-namespace forward triggers
    pub const TRIGGER_FORWARD: &str = "trigger-forward";
    /// Dedicated agent broker
    pub const BROKER: &str = "broker";
    /// RabbitmqBrokerConfig behind a dedicated broker
    pub const BROKER_CONFIG: &str = "broker-config";
}

/// Shared broker name for a function, honouring its override
pub fn shared_broker_name(override_name: Option<&str>) -> String {
    override_name
        .filter(|n| !n.is_empty())
        .unwrap_or(SHARED_BROKER_NAME)
        .to_string()
}

/// Trigger owned by a function
pub fn function_trigger_name(function: &str) -> String {
    format!("{function}-trigger")
}

/// Dedicated broker owned by an agent
pub fn agent_broker_name(agent: &str) -> String {
    format!("{agent}-broker")
}

/// RabbitmqBrokerConfig behind an agent's broker
pub fn agent_broker_config_name(agent: &str) -> String {
    format!("{agent}-broker-config")
}

/// Cluster-local ingress of an agent's broker
pub fn broker_ingress_uri(agent: &str, namespace: &str) -> String {
    format!("http://{agent}-broker-ingress.{namespace}.svc.cluster.local")
}

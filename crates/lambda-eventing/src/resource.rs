//! Catalogue of the third-party resource types the operator manages
//!
//! None of these are compiled in as typed resources; each kind maps to an
//! `ApiResource` used with `Api<DynamicObject>`.

use kube::discovery::ApiResource;
use lambda_common::kube_utils::build_api_resource;

/// Knative Eventing apiVersion for brokers and triggers
pub const EVENTING_API_VERSION: &str = "eventing.knative.dev/v1";

/// RabbitmqBrokerConfig apiVersion
pub const BROKER_CONFIG_API_VERSION: &str = "eventing.knative.dev/v1alpha1";

/// Knative Messaging apiVersion for channels
pub const MESSAGING_API_VERSION: &str = "messaging.knative.dev/v1";

/// Broker class annotation key
pub const BROKER_CLASS_ANNOTATION: &str = "eventing.knative.dev/broker.class";

/// Broker class served by the RabbitMQ broker implementation
pub const RABBITMQ_BROKER_CLASS: &str = "RabbitMQBroker";

/// Per-trigger dispatcher parallelism annotation
pub const PARALLELISM_ANNOTATION: &str = "rabbitmq.eventing.knative.dev/parallelism";

/// Per-trigger consumer prefetch annotation
pub const PREFETCH_ANNOTATION: &str = "rabbitmq.eventing.knative.dev/prefetchCount";

/// Resource types the topology managers address by kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// eventing.knative.dev/v1 Broker
    Broker,
    /// eventing.knative.dev/v1 Trigger
    Trigger,
    /// eventing.knative.dev/v1alpha1 RabbitmqBrokerConfig
    RabbitmqBrokerConfig,
    /// messaging.knative.dev/v1 Channel
    Channel,
}

impl ResourceKind {
    /// Kind string
    pub fn kind(self) -> &'static str {
        match self {
            Self::Broker => "Broker",
            Self::Trigger => "Trigger",
            Self::RabbitmqBrokerConfig => "RabbitmqBrokerConfig",
            Self::Channel => "Channel",
        }
    }

    /// apiVersion string
    pub fn api_version(self) -> &'static str {
        match self {
            Self::Broker | Self::Trigger => EVENTING_API_VERSION,
            Self::RabbitmqBrokerConfig => BROKER_CONFIG_API_VERSION,
            Self::Channel => MESSAGING_API_VERSION,
        }
    }

    /// ApiResource for dynamic access
    pub fn api_resource(self) -> ApiResource {
        build_api_resource(self.api_version(), self.kind())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_resources() {
        let ar = ResourceKind::Trigger.api_resource();
        assert_eq!(ar.group, "eventing.knative.dev");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "triggers");

        let ar = ResourceKind::RabbitmqBrokerConfig.api_resource();
        assert_eq!(ar.version, "v1alpha1");
        assert_eq!(ar.plural, "rabbitmqbrokerconfigs");

        let ar = ResourceKind::Channel.api_resource();
        assert_eq!(ar.group, "messaging.knative.dev");
        assert_eq!(ar.plural, "channels");
    }
}

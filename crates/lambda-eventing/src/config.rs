//! Operator-wide eventing defaults and per-function overrides
//!
//! Defaults come from the operator's flags. A function may override any
//! non-empty string or positive number; `dlq.enabled` overrides whenever a
//! `dlq` block is present.

use lambda_common::crd::EventingSpec;
use serde::Serialize;

/// Default RabbitmqCluster name
pub const DEFAULT_RABBITMQ_CLUSTER: &str = "rabbitmq";
/// Default RabbitmqCluster namespace
pub const DEFAULT_RABBITMQ_NAMESPACE: &str = "rabbitmq-system";
/// Default queue type
pub const DEFAULT_QUEUE_TYPE: &str = "quorum";
/// Default dispatcher parallelism per trigger
pub const DEFAULT_PARALLELISM: u32 = 50;
/// Default prefetch count
pub const DEFAULT_PREFETCH_COUNT: u32 = 100;

/// RabbitMQ settings for a broker and its triggers
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RabbitMqConfig {
    /// RabbitmqCluster name
    pub cluster_name: String,
    /// RabbitmqCluster namespace
    pub namespace: String,
    /// classic or quorum
    pub queue_type: String,
    /// Concurrent deliveries per trigger dispatcher
    pub parallelism: u32,
    /// Messages prefetched before acks
    pub prefetch_count: u32,
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_RABBITMQ_CLUSTER.to_string(),
            namespace: DEFAULT_RABBITMQ_NAMESPACE.to_string(),
            queue_type: DEFAULT_QUEUE_TYPE.to_string(),
            parallelism: DEFAULT_PARALLELISM,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
        }
    }
}

/// Periodic DLQ cleanup
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CleanupConfig {
    /// Cleanup runs at all
    pub enabled: bool,
    /// Interval between runs
    pub interval: String,
    /// Retention for dead-lettered messages
    pub retention: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: "1h".to_string(),
            retention: "168h".to_string(),
        }
    }
}

/// Dead-letter queue settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DlqConfig {
    /// Provision the DLQ alongside the broker
    pub enabled: bool,
    /// DLQ exchange
    pub exchange_name: String,
    /// DLQ queue
    pub queue_name: String,
    /// Routing key prefix for dead-lettered events
    pub routing_key_prefix: String,
    /// Retry policy kind
    pub retry_policy: String,
    /// Delivery attempts before dead-lettering
    pub retry_max_attempts: u32,
    /// Initial backoff (ISO 8601 duration)
    pub retry_backoff_delay: String,
    /// Backoff multiplier
    pub retry_backoff_multiplier: u32,
    /// Backoff policy kind
    pub backoff_policy: String,
    /// Message TTL in milliseconds
    pub message_ttl: u64,
    /// Maximum queue length
    pub max_length: u64,
    /// drop-head or reject-publish
    pub overflow_policy: String,
    /// Message count raising an alert
    pub alert_threshold: u32,
    /// Queue depth considered unhealthy
    pub depth_threshold: u64,
    /// Message age considered unhealthy
    pub age_threshold: String,
    /// Cleanup policy
    pub cleanup: CleanupConfig,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exchange_name: "lambda-dlq-exchange".to_string(),
            queue_name: "lambda-dlq-queue".to_string(),
            routing_key_prefix: "io.knative.lambda.dlq".to_string(),
            retry_policy: "exponential".to_string(),
            retry_max_attempts: 5,
            retry_backoff_delay: "PT1S".to_string(),
            retry_backoff_multiplier: 2,
            backoff_policy: "exponential".to_string(),
            message_ttl: 604_800_000,
            max_length: 100_000,
            overflow_policy: "reject-publish".to_string(),
            alert_threshold: 100,
            depth_threshold: 1000,
            age_threshold: "24h".to_string(),
            cleanup: CleanupConfig::default(),
        }
    }
}

/// Global eventing configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventingConfig {
    /// RabbitMQ defaults
    pub rabbitmq: RabbitMqConfig,
    /// DLQ defaults
    pub dlq: DlqConfig,
}

fn override_str(target: &mut String, value: Option<&String>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        *target = v.clone();
    }
}

fn override_num<T: Copy + Default + PartialOrd>(target: &mut T, value: Option<T>) {
    if let Some(v) = value.filter(|v| *v > T::default()) {
        *target = v;
    }
}

impl EventingConfig {
    /// RabbitMQ settings for a function, defaults overlaid with its overrides
    pub fn rabbitmq_for(&self, spec: Option<&EventingSpec>) -> RabbitMqConfig {
        let mut config = self.rabbitmq.clone();
        if let Some(rmq) = spec.and_then(|s| s.rabbitmq.as_ref()) {
            override_str(&mut config.cluster_name, rmq.cluster_name.as_ref());
            override_str(&mut config.namespace, rmq.namespace.as_ref());
            override_str(&mut config.queue_type, rmq.queue_type.as_ref());
            override_num(&mut config.parallelism, rmq.parallelism);
            override_num(&mut config.prefetch_count, rmq.prefetch_count);
        }
        config
    }

    /// DLQ settings for a function, defaults overlaid with its overrides
    pub fn dlq_for(&self, spec: Option<&EventingSpec>) -> DlqConfig {
        let mut config = self.dlq.clone();
        let Some(dlq) = spec.and_then(|s| s.dlq.as_ref()) else {
            return config;
        };

        if let Some(enabled) = dlq.enabled {
            config.enabled = enabled;
        }
        override_str(&mut config.exchange_name, dlq.exchange_name.as_ref());
        override_str(&mut config.queue_name, dlq.queue_name.as_ref());
        override_str(&mut config.routing_key_prefix, dlq.routing_key_prefix.as_ref());
        override_num(&mut config.retry_max_attempts, dlq.retry_max_attempts);
        override_str(
            &mut config.retry_backoff_delay,
            dlq.retry_backoff_delay.as_ref(),
        );
        override_num(&mut config.message_ttl, dlq.message_ttl);
        override_num(&mut config.max_length, dlq.max_length);
        override_str(&mut config.overflow_policy, dlq.overflow_policy.as_ref());
        if let Some(cleanup) = &dlq.cleanup {
            config.cleanup.enabled = cleanup.enabled;
            override_str(&mut config.cleanup.interval, cleanup.interval.as_ref());
            override_str(&mut config.cleanup.retention, cleanup.retention.as_ref());
        }
        config
    }

    /// Whether DLQ monitoring resources are requested
    pub fn monitoring_for(spec: Option<&EventingSpec>) -> bool {
        spec.and_then(|s| s.monitoring.as_ref())
            .is_some_and(|m| m.enabled)
    }
}

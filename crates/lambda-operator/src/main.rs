//! Lambda Operator - eventing topology for serverless functions and agents

use std::sync::Arc;

use clap::{ArgAction, Args, Parser};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use lambda_common::crd::{LambdaAgent, LambdaFunction};
use lambda_common::telemetry::{init_telemetry, TelemetryConfig};
use lambda_common::FIELD_MANAGER;
use lambda_eventing::config::CleanupConfig;
use lambda_eventing::{
    DedicatedTopologyManager, DlqConfig, EventingConfig, KubeClusterApi, RabbitMqConfig,
    SharedTopologyManager, TemplateRenderer,
};
use lambda_operator::controller_runner::{build_agent_controller, build_function_controller};

/// Lambda operator - Knative brokers, triggers and DLQs for LambdaFunction and LambdaAgent
#[derive(Parser, Debug)]
#[command(name = "lambda-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Emit JSON log lines
    #[arg(long, env = "LAMBDA_LOG_JSON", default_value_t = true, action = ArgAction::Set)]
    log_json: bool,

    /// Skip installing CRDs on startup
    #[arg(long, env = "LAMBDA_SKIP_CRD_INSTALL")]
    skip_crd_install: bool,

    #[command(flatten)]
    rabbitmq: RabbitMqArgs,

    #[command(flatten)]
    dlq: DlqArgs,
}

#[derive(Args, Debug)]
struct RabbitMqArgs {
    /// RabbitmqCluster backing every broker
    #[arg(long = "rabbitmq-cluster", env = "LAMBDA_RABBITMQ_CLUSTER", default_value = lambda_eventing::config::DEFAULT_RABBITMQ_CLUSTER)]
    cluster_name: String,

    /// Namespace of the RabbitmqCluster
    #[arg(long = "rabbitmq-namespace", env = "LAMBDA_RABBITMQ_NAMESPACE", default_value = lambda_eventing::config::DEFAULT_RABBITMQ_NAMESPACE)]
    namespace: String,

    /// Queue type for broker queues (classic or quorum)
    #[arg(long = "rabbitmq-queue-type", env = "LAMBDA_RABBITMQ_QUEUE_TYPE", default_value = lambda_eventing::config::DEFAULT_QUEUE_TYPE)]
    queue_type: String,

    /// Concurrent deliveries per trigger
    #[arg(long = "rabbitmq-parallelism", env = "LAMBDA_RABBITMQ_PARALLELISM", default_value_t = lambda_eventing::config::DEFAULT_PARALLELISM)]
    parallelism: u32,

    /// Prefetch count per consumer
    #[arg(long = "rabbitmq-prefetch", env = "LAMBDA_RABBITMQ_PREFETCH", default_value_t = lambda_eventing::config::DEFAULT_PREFETCH_COUNT)]
    prefetch_count: u32,
}

#[derive(Args, Debug)]
struct DlqArgs {
    /// Provision a dead-letter queue next to each shared broker
    #[arg(long = "dlq-enabled", env = "LAMBDA_DLQ_ENABLED", default_value_t = true, action = ArgAction::Set)]
    enabled: bool,

    /// DLQ exchange name
    #[arg(long = "dlq-exchange", env = "LAMBDA_DLQ_EXCHANGE", default_value = "lambda-dlq-exchange")]
    exchange_name: String,

    /// DLQ queue name
    #[arg(long = "dlq-queue", env = "LAMBDA_DLQ_QUEUE", default_value = "lambda-dlq-queue")]
    queue_name: String,

    /// Routing key prefix for dead-lettered events
    #[arg(long = "dlq-routing-key-prefix", env = "LAMBDA_DLQ_ROUTING_KEY_PREFIX", default_value = "io.knative.lambda.dlq")]
    routing_key_prefix: String,

    /// Delivery attempts before dead-lettering
    #[arg(long = "dlq-retry-max-attempts", env = "LAMBDA_DLQ_RETRY_MAX_ATTEMPTS", default_value_t = 5)]
    retry_max_attempts: u32,

    /// Initial delivery backoff (ISO 8601 duration)
    #[arg(long = "dlq-retry-backoff-delay", env = "LAMBDA_DLQ_RETRY_BACKOFF_DELAY", default_value = "PT1S")]
    retry_backoff_delay: String,

    /// Dead-letter message TTL in milliseconds
    #[arg(long = "dlq-message-ttl", env = "LAMBDA_DLQ_MESSAGE_TTL", default_value_t = 604_800_000)]
    message_ttl: u64,

    /// Maximum DLQ length
    #[arg(long = "dlq-max-length", env = "LAMBDA_DLQ_MAX_LENGTH", default_value_t = 100_000)]
    max_length: u64,

    /// Overflow behaviour once the DLQ is full (drop-head or reject-publish)
    #[arg(long = "dlq-overflow-policy", env = "LAMBDA_DLQ_OVERFLOW_POLICY", default_value = "reject-publish")]
    overflow_policy: String,

    /// Periodically purge old dead-lettered messages
    #[arg(long = "dlq-cleanup-enabled", env = "LAMBDA_DLQ_CLEANUP_ENABLED")]
    cleanup_enabled: bool,
}

impl Cli {
    fn eventing_config(&self) -> EventingConfig {
        let dlq_defaults = DlqConfig::default();
        EventingConfig {
            rabbitmq: RabbitMqConfig {
                cluster_name: self.rabbitmq.cluster_name.clone(),
                namespace: self.rabbitmq.namespace.clone(),
                queue_type: self.rabbitmq.queue_type.clone(),
                parallelism: self.rabbitmq.parallelism,
                prefetch_count: self.rabbitmq.prefetch_count,
            },
            dlq: DlqConfig {
                enabled: self.dlq.enabled,
                exchange_name: self.dlq.exchange_name.clone(),
                queue_name: self.dlq.queue_name.clone(),
                routing_key_prefix: self.dlq.routing_key_prefix.clone(),
                retry_max_attempts: self.dlq.retry_max_attempts,
                retry_backoff_delay: self.dlq.retry_backoff_delay.clone(),
                message_ttl: self.dlq.message_ttl,
                max_length: self.dlq.max_length,
                overflow_policy: self.dlq.overflow_policy.clone(),
                cleanup: CleanupConfig {
                    enabled: self.dlq.cleanup_enabled,
                    ..dlq_defaults.cleanup.clone()
                },
                ..dlq_defaults
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [LambdaFunction::crd(), LambdaAgent::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install aws-lc-rs crypto provider: {:?}", e);
    }

    init_telemetry(TelemetryConfig {
        service_name: "lambda-operator".to_string(),
        json: cli.log_json,
    })?;

    run_controllers(&cli).await
}

/// Install the LambdaFunction and LambdaAgent CRDs with server-side apply
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [LambdaFunction::crd(), LambdaAgent::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }
    Ok(())
}

async fn run_controllers(cli: &Cli) -> anyhow::Result<()> {
    tracing::info!("Lambda operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if !cli.skip_crd_install {
        ensure_crds_installed(&client).await?;
    }

    let config = cli.eventing_config();
    tracing::info!(
        rabbitmq_cluster = %config.rabbitmq.cluster_name,
        rabbitmq_namespace = %config.rabbitmq.namespace,
        dlq = config.dlq.enabled,
        "eventing defaults"
    );

    let api = Arc::new(KubeClusterApi::new(client.clone()));
    let renderer = Arc::new(TemplateRenderer::new()?);
    let shared = Arc::new(SharedTopologyManager::new(
        api.clone(),
        renderer,
        config.clone(),
    ));
    let dedicated = Arc::new(DedicatedTopologyManager::new(api, config));

    tracing::info!("Starting controllers:");
    let function_controller = build_function_controller(client.clone(), shared);
    let agent_controller = build_agent_controller(client, dedicated);

    tokio::select! {
        _ = function_controller => {
            tracing::info!("LambdaFunction controller completed");
        }
        _ = agent_controller => {
            tracing::info!("LambdaAgent controller completed");
        }
    }

    tracing::info!("Lambda operator shutting down");
    Ok(())
}

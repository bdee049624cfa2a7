//! LambdaFunction controller
//!
//! Provisions the namespace's shared broker and DLQ on first use and keeps
//! the function's own trigger in sync. Deleting a function removes only its
//! trigger.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use lambda_common::crd::{LambdaFunction, LambdaFunctionStatus, FUNCTION_FINALIZER};
use lambda_common::kube_utils::has_finalizer;
use lambda_eventing::{FunctionRouting, FunctionTopology};

use super::{
    add_finalizer, conditions_match, eventing_condition, patch_status, reason, remove_finalizer,
    upsert_condition, FINALIZER_REQUEUE, RESYNC_INTERVAL, RETRY_INTERVAL,
};
use crate::Error;

// =============================================================================
// Kubernetes access
// =============================================================================

/// Writes the controller makes to LambdaFunction objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FunctionKubeClient: Send + Sync {
    /// Add the teardown finalizer
    async fn add_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Remove the teardown finalizer
    async fn remove_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &LambdaFunctionStatus,
    ) -> Result<(), Error>;
}

/// [`FunctionKubeClient`] backed by the API server
pub struct FunctionKubeClientImpl {
    client: Client,
}

impl FunctionKubeClientImpl {
    /// Create a new FunctionKubeClientImpl
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<LambdaFunction> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl FunctionKubeClient for FunctionKubeClientImpl {
    async fn add_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        add_finalizer(&self.api(namespace), name, FUNCTION_FINALIZER).await
    }

    async fn remove_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        remove_finalizer(&self.api(namespace), name, FUNCTION_FINALIZER).await
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &LambdaFunctionStatus,
    ) -> Result<(), Error> {
        patch_status(
            &self.api(namespace),
            name,
            status,
            &["brokerName", "triggerName"],
        )
        .await
    }
}

// =============================================================================
// Context
// =============================================================================

/// Shared context for the LambdaFunction controller
pub struct FunctionContext {
    /// LambdaFunction writes
    pub kube: Arc<dyn FunctionKubeClient>,
    /// Shared broker and trigger provisioning
    pub topology: Arc<dyn FunctionTopology>,
}

impl FunctionContext {
    /// Create a context talking to the API server
    pub fn new(client: Client, topology: Arc<dyn FunctionTopology>) -> Self {
        Self {
            kube: Arc::new(FunctionKubeClientImpl::new(client)),
            topology,
        }
    }

    /// Create a context from explicit clients
    pub fn with_clients(
        kube: Arc<dyn FunctionKubeClient>,
        topology: Arc<dyn FunctionTopology>,
    ) -> Self {
        Self { kube, topology }
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile a LambdaFunction
#[instrument(skip(function, ctx), fields(function = %function.name_any()))]
pub async fn reconcile(
    function: Arc<LambdaFunction>,
    ctx: Arc<FunctionContext>,
) -> Result<Action, Error> {
    let name = function.name_any();
    let namespace = function.namespace().ok_or_else(|| Error::MissingNamespace {
        kind: "LambdaFunction",
        name: name.clone(),
    })?;

    if function.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&function, &ctx, &name, &namespace).await;
    }

    if !has_finalizer(function.as_ref(), FUNCTION_FINALIZER) {
        info!("adding finalizer");
        ctx.kube.add_finalizer(&name, &namespace).await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    if let Err(message) = function.spec.validate() {
        let err = lambda_common::Error::validation_for(&name, message);
        warn!(error = %err, "function validation failed");
        let message = err.to_string();
        let status = desired_status(&function, None, reason::VALIDATION_FAILED, &message);
        update_status(&function, &ctx, &name, &namespace, status).await?;
        return Ok(Action::await_change());
    }

    match ctx.topology.ensure_topology(&function).await {
        Ok(Some(routing)) => {
            let message = format!(
                "trigger {} subscribed to broker {}",
                routing.trigger_name, routing.broker_name
            );
            let status =
                desired_status(&function, Some(&routing), reason::TOPOLOGY_READY, &message);
            update_status(&function, &ctx, &name, &namespace, status).await?;
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        Ok(None) => {
            // drop a trigger left from when eventing was on
            ctx.topology.teardown_topology(&function).await?;
            let status = desired_status(
                &function,
                None,
                reason::EVENTING_DISABLED,
                "eventing disabled in spec",
            );
            update_status(&function, &ctx, &name, &namespace, status).await?;
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        Err(e) => {
            let status =
                desired_status(&function, None, reason::EVENTING_FAILED, &e.to_string());
            if let Err(patch_err) = update_status(&function, &ctx, &name, &namespace, status).await
            {
                warn!(error = %patch_err, "failed to record eventing failure on status");
            }
            Err(e.into())
        }
    }
}

async fn handle_deletion(
    function: &LambdaFunction,
    ctx: &FunctionContext,
    name: &str,
    namespace: &str,
) -> Result<Action, Error> {
    if !has_finalizer(function, FUNCTION_FINALIZER) {
        return Ok(Action::await_change());
    }

    ctx.topology.teardown_topology(function).await?;
    ctx.kube.remove_finalizer(name, namespace).await?;
    info!("function eventing torn down, finalizer removed");
    Ok(Action::await_change())
}

fn desired_status(
    function: &LambdaFunction,
    routing: Option<&FunctionRouting>,
    reason: &str,
    message: &str,
) -> LambdaFunctionStatus {
    let existing = function
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    LambdaFunctionStatus {
        broker_name: routing.map(|r| r.broker_name.clone()),
        trigger_name: routing.map(|r| r.trigger_name.clone()),
        observed_generation: function.metadata.generation,
        conditions: upsert_condition(
            existing,
            eventing_condition(routing.is_some(), reason, message),
        ),
    }
}

/// Patch status unless it already matches, so status writes do not retrigger
/// the watch
async fn update_status(
    function: &LambdaFunction,
    ctx: &FunctionContext,
    name: &str,
    namespace: &str,
    status: LambdaFunctionStatus,
) -> Result<(), Error> {
    if let Some(current) = &function.status {
        if current.broker_name == status.broker_name
            && current.trigger_name == status.trigger_name
            && current.observed_generation == status.observed_generation
            && conditions_match(&current.conditions, &status.conditions)
        {
            debug!("status unchanged, skipping patch");
            return Ok(());
        }
    }
    ctx.kube.patch_status(name, namespace, &status).await
}

/// Error policy for the LambdaFunction controller
///
/// Retryable errors requeue after [`RETRY_INTERVAL`]; permanent ones wait for
/// a spec change.
pub fn error_policy(
    function: Arc<LambdaFunction>,
    error: &Error,
    _ctx: Arc<FunctionContext>,
) -> Action {
    error!(
        ?error,
        function = %function.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(RETRY_INTERVAL)
    } else {
        Action::await_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use lambda_common::crd::{ConditionStatus, EventingSpec, LambdaFunctionSpec};
    use lambda_eventing::EventingError;
    use mockall::mock;
    use std::time::Duration;

    // FunctionTopology's automock only exists inside lambda-eventing's tests
    mock! {
        pub Topology {}

        #[async_trait]
        impl FunctionTopology for Topology {
            async fn ensure_topology(
                &self,
                function: &LambdaFunction,
            ) -> Result<Option<FunctionRouting>, EventingError>;
            async fn teardown_topology(&self, function: &LambdaFunction) -> Result<(), EventingError>;
        }
    }

    fn sample_function(name: &str) -> LambdaFunction {
        LambdaFunction {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("media".to_string()),
                uid: Some(format!("uid-{name}")),
                generation: Some(2),
                finalizers: Some(vec![FUNCTION_FINALIZER.to_string()]),
                ..Default::default()
            },
            spec: LambdaFunctionSpec::default(),
            status: None,
        }
    }

    fn routing() -> FunctionRouting {
        FunctionRouting {
            broker_name: "lambda-broker".to_string(),
            trigger_name: "thumbnail-trigger".to_string(),
        }
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    fn context(kube: MockFunctionKubeClient, topology: MockTopology) -> Arc<FunctionContext> {
        Arc::new(FunctionContext::with_clients(
            Arc::new(kube),
            Arc::new(topology),
        ))
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    #[tokio::test]
    async fn story_new_function_gets_finalizer_before_topology() {
        let mut function = sample_function("thumbnail");
        function.metadata.finalizers = None;

        let mut kube = MockFunctionKubeClient::new();
        kube.expect_add_finalizer()
            .withf(|name, ns| name == "thumbnail" && ns == "media")
            .times(1)
            .returning(|_, _| Ok(()));
        let mut topology = MockTopology::new();
        topology.expect_ensure_topology().never();

        let action = reconcile(Arc::new(function), context(kube, topology))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn story_provisioned_function_reports_ready() {
        let mut kube = MockFunctionKubeClient::new();
        kube.expect_patch_status()
            .withf(|_, _, status| {
                status.broker_name.as_deref() == Some("lambda-broker")
                    && status.trigger_name.as_deref() == Some("thumbnail-trigger")
                    && status.observed_generation == Some(2)
                    && status.conditions.len() == 1
                    && status.conditions[0].status == ConditionStatus::True
                    && status.conditions[0].reason == "TopologyReady"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut topology = MockTopology::new();
        topology
            .expect_ensure_topology()
            .times(1)
            .returning(|_| Ok(Some(routing())));

        let action = reconcile(Arc::new(sample_function("thumbnail")), context(kube, topology))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
    }

    #[tokio::test]
    async fn story_unchanged_status_is_not_patched() {
        let mut function = sample_function("thumbnail");
        function.status = Some(LambdaFunctionStatus {
            broker_name: Some("lambda-broker".to_string()),
            trigger_name: Some("thumbnail-trigger".to_string()),
            observed_generation: Some(2),
            conditions: vec![eventing_condition(
                true,
                reason::TOPOLOGY_READY,
                "trigger thumbnail-trigger subscribed to broker lambda-broker",
            )],
        });

        let mut kube = MockFunctionKubeClient::new();
        kube.expect_patch_status().never();
        let mut topology = MockTopology::new();
        topology
            .expect_ensure_topology()
            .returning(|_| Ok(Some(routing())));

        reconcile(Arc::new(function), context(kube, topology))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn story_disabled_eventing_drops_trigger() {
        let mut function = sample_function("thumbnail");
        function.spec.eventing = Some(EventingSpec {
            enabled: Some(false),
            ..Default::default()
        });

        let mut kube = MockFunctionKubeClient::new();
        kube.expect_patch_status()
            .withf(|_, _, status| {
                status.broker_name.is_none()
                    && status.conditions[0].status == ConditionStatus::False
                    && status.conditions[0].reason == "EventingDisabled"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut topology = MockTopology::new();
        topology.expect_ensure_topology().returning(|_| Ok(None));
        topology
            .expect_teardown_topology()
            .times(1)
            .returning(|_| Ok(()));

        reconcile(Arc::new(function), context(kube, topology))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn story_invalid_spec_waits_for_change() {
        let mut function = sample_function("thumbnail");
        function.spec.eventing = Some(EventingSpec {
            broker_name: Some("Not_A_Label".to_string()),
            ..Default::default()
        });

        let mut kube = MockFunctionKubeClient::new();
        kube.expect_patch_status()
            .withf(|_, _, status| status.conditions[0].reason == "ValidationFailed")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut topology = MockTopology::new();
        topology.expect_ensure_topology().never();

        let action = reconcile(Arc::new(function), context(kube, topology))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn story_topology_failure_is_recorded_and_returned() {
        let mut kube = MockFunctionKubeClient::new();
        kube.expect_patch_status()
            .withf(|_, _, status| {
                status.conditions[0].reason == "EventingFailed"
                    && status.conditions[0].message.contains("lambda-broker")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut topology = MockTopology::new();
        topology.expect_ensure_topology().returning(|_| {
            Err(EventingError::apply(
                "Broker",
                "lambda-broker",
                "media",
                api_error(503),
            ))
        });

        let err = reconcile(Arc::new(sample_function("thumbnail")), context(kube, topology))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    #[tokio::test]
    async fn story_deletion_tears_down_then_releases_finalizer() {
        let mut function = sample_function("thumbnail");
        function.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));

        let mut seq = mockall::Sequence::new();
        let mut topology = MockTopology::new();
        topology
            .expect_teardown_topology()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let mut kube = MockFunctionKubeClient::new();
        kube.expect_remove_finalizer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let action = reconcile(Arc::new(function), context(kube, topology))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn story_failed_teardown_keeps_finalizer() {
        let mut function = sample_function("thumbnail");
        function.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));

        let mut topology = MockTopology::new();
        topology
            .expect_teardown_topology()
            .returning(|_| Err(EventingError::Api(api_error(500))));
        let mut kube = MockFunctionKubeClient::new();
        kube.expect_remove_finalizer().never();

        let result = reconcile(Arc::new(function), context(kube, topology)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn story_deleted_function_without_finalizer_is_ignored() {
        let mut function = sample_function("thumbnail");
        function.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        function.metadata.finalizers = None;

        let mut topology = MockTopology::new();
        topology.expect_teardown_topology().never();

        let action = reconcile(
            Arc::new(function),
            context(MockFunctionKubeClient::new(), topology),
        )
        .await
        .unwrap();
        assert_eq!(action, Action::await_change());
    }

    // =========================================================================
    // Error policy
    // =========================================================================

    #[test]
    fn test_error_policy_retries_transient_errors() {
        let ctx = context(MockFunctionKubeClient::new(), MockTopology::new());
        let function = Arc::new(sample_function("thumbnail"));

        let transient = Error::Kube(api_error(503));
        assert_eq!(
            error_policy(function.clone(), &transient, ctx.clone()),
            Action::requeue(RETRY_INTERVAL)
        );

        let permanent = Error::Eventing(EventingError::Parse("bad yaml".to_string()));
        assert_eq!(
            error_policy(function, &permanent, ctx),
            Action::await_change()
        );
    }
}

//! Controller runner - builds controller futures for each CRD
//!
//! Each `build_*` function returns a boxed future that the binary drives;
//! all of them stop on SIGTERM/SIGINT.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use lambda_common::crd::{LambdaAgent, LambdaFunction};
use lambda_eventing::{AgentTopology, FunctionTopology};

use crate::controller::{agent, function};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client times out.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the LambdaFunction controller
pub fn build_function_controller(
    client: Client,
    topology: Arc<dyn FunctionTopology>,
) -> ControllerFuture {
    let ctx = Arc::new(function::FunctionContext::new(client.clone(), topology));
    let functions: Api<LambdaFunction> = Api::all(client);

    tracing::info!("- LambdaFunction controller");

    Box::pin(
        Controller::new(
            functions,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(function::reconcile, function::error_policy, ctx)
        .for_each(log_reconcile_result("LambdaFunction")),
    )
}

/// Build the LambdaAgent controller
pub fn build_agent_controller(client: Client, topology: Arc<dyn AgentTopology>) -> ControllerFuture {
    let ctx = Arc::new(agent::AgentContext::new(client.clone(), topology));
    let agents: Api<LambdaAgent> = Api::all(client);

    tracing::info!("- LambdaAgent controller");

    Box::pin(
        Controller::new(agents, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(agent::reconcile, agent::error_policy, ctx)
            .for_each(log_reconcile_result("LambdaAgent")),
    )
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

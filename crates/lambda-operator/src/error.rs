//! Controller error types

use lambda_eventing::EventingError;

/// Errors surfaced by the LambdaFunction and LambdaAgent controllers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Provisioning or teardown of eventing topology failed
    #[error("eventing error: {0}")]
    Eventing(#[from] EventingError),

    /// Kubernetes API error on the CRD itself (finalizer or status)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Error from the shared lambda utilities
    #[error("{0}")]
    Common(#[from] lambda_common::Error),

    /// Status could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object reached the controller without a namespace
    #[error("missing namespace on {kind} '{name}'")]
    MissingNamespace {
        /// CRD kind
        kind: &'static str,
        /// Object name
        name: String,
    },
}

impl Error {
    /// Whether the controller should retry after a backoff
    ///
    /// API rejections (4xx other than conflicts and throttling) and
    /// malformed objects wait for a spec change instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Eventing(e) => e.is_retryable(),
            Error::Kube(e) => !matches!(
                e,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
                    && ae.code != 409
                    && ae.code != 429
            ),
            Error::Common(e) => e.is_retryable(),
            Error::Serialization(_) => false,
            Error::MissingNamespace { .. } => false,
        }
    }
}

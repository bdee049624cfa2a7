//! Common types for the lambda operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod naming;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group served by the LambdaFunction and LambdaAgent CRDs
pub const API_GROUP: &str = "lambda.knative.io";

/// Field manager used for every patch issued by the operator
pub const FIELD_MANAGER: &str = "knative-lambda-operator";

/// Standard Kubernetes label for the owning application name
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard Kubernetes label for the role of a generated resource
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard Kubernetes label for the managing controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on every resource this operator creates
pub const MANAGED_BY_VALUE: &str = "knative-lambda-operator";

/// Label carrying the LambdaFunction name on its trigger
pub const LABEL_FUNCTION_NAME: &str = "lambda.knative.io/name";

/// Label carrying the sanitized event type on an agent's inbound trigger
pub const LABEL_EVENT_TYPE: &str = "lambda.knative.io/event-type";

/// Label carrying the target agent on a forward trigger
pub const LABEL_TARGET_AGENT: &str = "lambda.knative.io/target-agent";

/// Label carrying the target namespace on a forward trigger
pub const LABEL_TARGET_NAMESPACE: &str = "lambda.knative.io/target-ns";

/// Annotation switching a LambdaFunction to catch-all receiver mode
pub const RECEIVER_MODE_ANNOTATION: &str = "lambda.knative.io/receiver-mode";

/// Annotation holding the hash of the desired state last written to an owned resource
pub const SPEC_HASH_ANNOTATION: &str = "lambda.knative.io/spec-hash";

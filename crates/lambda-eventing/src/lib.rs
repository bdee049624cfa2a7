//! Eventing topology for lambda functions and agents
//!
//! Functions publish through a shared per-namespace RabbitMQ broker with a
//! dead-letter queue, each owning one trigger. Agents get a dedicated broker,
//! a trigger per subscription and forward triggers that deliver to other
//! agents' broker ingress.

#![deny(missing_docs)]

/// Apply rendered multi-document manifests
pub mod applier;
/// Cluster access behind a mockable trait
pub mod client;
/// Operator-wide RabbitMQ and DLQ defaults
pub mod config;
/// Dedicated per-agent topology
pub mod dedicated;
/// Untyped Kubernetes objects with builder helpers
pub mod document;
/// Eventing error types
pub mod error;
/// Create-or-update with ownership and drift policies
pub mod lifecycle;
/// Per-namespace async locks
pub mod locks;
/// Deterministic resource names
pub mod naming;
/// Broker and DLQ manifest templates
pub mod renderer;
/// Knative and RabbitMQ resource catalogue
pub mod resource;
/// Shared per-namespace topology for functions
pub mod shared;

#[cfg(test)]
mod testing;

pub use client::{ClusterApi, KubeClusterApi};
pub use config::{DlqConfig, EventingConfig, RabbitMqConfig};
pub use dedicated::{AgentRouting, AgentTeardown, AgentTopology, DedicatedTopologyManager};
pub use error::EventingError;
pub use renderer::{ManifestRenderer, TemplateRenderer};
pub use shared::{FunctionRouting, FunctionTopology, SharedTopologyManager};

/// Result type alias for eventing operations
pub type Result<T> = std::result::Result<T, EventingError>;

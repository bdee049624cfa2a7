//! Shared Kubernetes utilities using kube-rs
//!
//! Resources the operator does not compile types for (Knative brokers and
//! triggers, RabbitMQ topology objects) are addressed through an `ApiResource`
//! built from their apiVersion and kind.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::discovery::ApiResource;
use kube::Resource;

use crate::Error;

/// Build an ApiResource from an apiVersion string and kind
///
/// ```ignore
/// let ar = build_api_resource("eventing.knative.dev/v1", "Trigger");
/// let api: Api<DynamicObject> = Api::namespaced_with(client, "default", &ar);
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use lambda_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("eventing.knative.dev/v1");
/// assert_eq!(group, "eventing.knative.dev");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Kinds whose plural does not follow the simple suffix rules
const KIND_PLURALS: &[(&str, &str)] = &[
    ("rabbitmqbrokerconfig", "rabbitmqbrokerconfigs"),
    ("rabbitmqcluster", "rabbitmqclusters"),
    ("policy", "policies"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for known kinds, falling back to simple
/// pluralization rules for everything else.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Build a controller owner reference pointing at `owner`
///
/// Children stamped with this reference are garbage-collected by the cluster
/// when the owner is deleted. Fails when the owner has not been persisted yet
/// (no uid).
pub fn controller_owner_ref<K>(owner: &K) -> Result<OwnerReference, Error>
where
    K: Resource<DynamicType = ()>,
{
    let mut owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "owner_reference",
            format!(
                "{} {} has no uid",
                K::kind(&()),
                owner.meta().name.as_deref().unwrap_or_default()
            ),
        )
    })?;
    owner_ref.block_owner_deletion = Some(true);
    Ok(owner_ref)
}

/// Check whether an object carries the given finalizer
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == finalizer))
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 so the value is stable across toolchains and
/// can be persisted in annotations.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

//! Lifecycle policies for generated resources
//!
//! Shared resources (namespace broker and DLQ) carry no owner and are only
//! ever created. Owned resources carry a controller reference so the cluster
//! garbage-collects them with their owner; they are either create-only or
//! kept in line with the desired state through a spec-hash annotation.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{debug, info};

use lambda_common::SPEC_HASH_ANNOTATION;

use crate::client::{ClusterApi, CreateOutcome};
use crate::document::Document;
use crate::error::EventingError;

/// Who a generated resource belongs to
#[derive(Clone, Debug, PartialEq)]
pub enum Ownership {
    /// Outlives any single consumer; never updated or deleted by the operator
    Shared,
    /// Controller-owned, deleted with the owner
    Owned(OwnerReference),
}

/// How an existing owned resource is treated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drift {
    /// Leave whatever is there
    Ignore,
    /// Replace when the desired state hash differs
    Replace,
}

/// What an ensure call did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ensured {
    /// Created by this call
    Created,
    /// Lost a create race; another writer's object stands
    AlreadyExists,
    /// Present and left alone
    Unchanged,
    /// Replaced with the desired state
    Updated,
}

impl From<CreateOutcome> for Ensured {
    fn from(outcome: CreateOutcome) -> Self {
        match outcome {
            CreateOutcome::Created => Self::Created,
            CreateOutcome::AlreadyExists => Self::AlreadyExists,
        }
    }
}

/// Make sure `desired` exists, following its ownership and drift policy
pub async fn ensure(
    api: &dyn ClusterApi,
    desired: Document,
    ownership: Ownership,
    drift: Drift,
) -> Result<Ensured, EventingError> {
    let (mut desired, drift) = match ownership {
        Ownership::Shared => (desired, Drift::Ignore),
        Ownership::Owned(owner) => (desired.with_owner(owner), drift),
    };

    let hash = (drift == Drift::Replace).then(|| desired.content_hash());
    if let Some(hash) = &hash {
        desired.set_annotation(SPEC_HASH_ANNOTATION, hash);
    }

    let existing = api
        .get(desired.api_resource(), desired.namespace(), desired.name())
        .await?;

    let Some(existing) = existing else {
        let outcome = api.create(&desired).await?;
        if outcome == CreateOutcome::Created {
            info!(
                kind = %desired.kind(),
                name = %desired.name(),
                namespace = %desired.namespace(),
                "created resource"
            );
        }
        return Ok(outcome.into());
    };

    let Some(hash) = hash else {
        return Ok(Ensured::Unchanged);
    };
    if existing.annotation(SPEC_HASH_ANNOTATION) == Some(hash.as_str()) {
        debug!(
            kind = %desired.kind(),
            name = %desired.name(),
            "resource up to date"
        );
        return Ok(Ensured::Unchanged);
    }

    desired.set_resource_version(existing.resource_version().map(str::to_string));
    api.replace(&desired).await?;
    info!(
        kind = %desired.kind(),
        name = %desired.name(),
        namespace = %desired.namespace(),
        "updated drifted resource"
    );
    Ok(Ensured::Updated)
}

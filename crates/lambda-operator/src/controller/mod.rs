//! Controllers for LambdaFunction and LambdaAgent
//!
//! Both follow the same loop: deletion runs teardown and releases the
//! finalizer, a live object gets the finalizer first, then a validated spec
//! is provisioned and the outcome recorded on status.

pub mod agent;
pub mod function;

use std::fmt::Debug;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use lambda_common::crd::{Condition, ConditionStatus, EVENTING_READY_CONDITION};
use lambda_common::FIELD_MANAGER;

use crate::Error;

/// Periodic resync of a healthy object
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Backoff after a retryable failure or while waiting on a broker
pub const RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Requeue right after the finalizer was added
pub const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// EventingReady reasons
pub mod reason {
    /// Broker and triggers provisioned
    pub const TOPOLOGY_READY: &str = "TopologyReady";
    /// Eventing switched off in the spec
    pub const EVENTING_DISABLED: &str = "EventingDisabled";
    /// Spec rejected before provisioning
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Provisioning failed against the cluster
    pub const EVENTING_FAILED: &str = "EventingFailed";
}

/// Build the EventingReady condition
pub fn eventing_condition(ready: bool, reason: &str, message: impl Into<String>) -> Condition {
    let status = if ready {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    Condition::new(EVENTING_READY_CONDITION, status, reason, message)
}

/// Replace the condition of the same type, keeping its transition time when
/// the state did not change
pub fn upsert_condition(existing: &[Condition], mut condition: Condition) -> Vec<Condition> {
    let mut out: Vec<Condition> = existing
        .iter()
        .filter(|c| c.type_ != condition.type_)
        .cloned()
        .collect();
    if let Some(prev) = existing.iter().find(|c| c.type_ == condition.type_) {
        if prev.status == condition.status {
            condition.last_transition_time = prev.last_transition_time;
        }
    }
    out.push(condition);
    out
}

/// Condition lists equal ignoring order and timestamps
pub fn conditions_match(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|c| b.iter().any(|other| other.type_ == c.type_ && c.same_state(other)))
}

/// Merge patch for status; `cleared` fields that serialize as absent are
/// sent as null so stale values are removed
fn status_patch<S: Serialize>(status: &S, cleared: &[&str]) -> Result<Value, Error> {
    let mut value = serde_json::to_value(status)?;
    if let Value::Object(map) = &mut value {
        for field in cleared {
            map.entry(field.to_string()).or_insert(Value::Null);
        }
    }
    Ok(json!({ "status": value }))
}

async fn patch_status<K, S>(
    api: &Api<K>,
    name: &str,
    status: &S,
    cleared: &[&str],
) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize,
{
    let patch = status_patch(status, cleared)?;
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn add_finalizer<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let object = api.get(name).await?;
    let mut finalizers = object.meta().finalizers.clone().unwrap_or_default();
    if finalizers.iter().any(|f| f == finalizer) {
        return Ok(());
    }
    finalizers.push(finalizer.to_string());
    patch_finalizers(api, name, finalizers).await
}

async fn remove_finalizer<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let Some(object) = api.get_opt(name).await? else {
        return Ok(());
    };
    let finalizers: Vec<String> = object
        .meta()
        .finalizers
        .iter()
        .flatten()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    patch_finalizers(api, name, finalizers).await
}

async fn patch_finalizers<K>(api: &Api<K>, name: &str, finalizers: Vec<String>) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchanged_condition_keeps_transition_time() {
        let mut old = eventing_condition(true, reason::TOPOLOGY_READY, "ready");
        old.last_transition_time -= chrono::Duration::hours(1);

        let merged = upsert_condition(
            std::slice::from_ref(&old),
            eventing_condition(true, reason::TOPOLOGY_READY, "ready again"),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].last_transition_time, old.last_transition_time);
        assert_eq!(merged[0].message, "ready again");
    }

    #[test]
    fn test_flipped_condition_gets_new_transition_time() {
        let mut old = eventing_condition(true, reason::TOPOLOGY_READY, "ready");
        old.last_transition_time -= chrono::Duration::hours(1);

        let merged = upsert_condition(
            &[old.clone()],
            eventing_condition(false, reason::EVENTING_FAILED, "boom"),
        );
        assert!(merged[0].last_transition_time > old.last_transition_time);
        assert_eq!(merged[0].status, ConditionStatus::False);
    }

    #[test]
    fn test_other_conditions_are_preserved() {
        let other = Condition::new("Reachable", ConditionStatus::True, "Ok", "");
        let merged = upsert_condition(
            &[other.clone()],
            eventing_condition(false, reason::EVENTING_DISABLED, "off"),
        );
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|c| c.type_ == "Reachable"));
    }

    #[test]
    fn test_conditions_match_ignores_timestamps() {
        let a = eventing_condition(true, reason::TOPOLOGY_READY, "ready");
        let mut b = a.clone();
        b.last_transition_time += chrono::Duration::seconds(5);
        assert!(conditions_match(&[a.clone()], &[b]));
        assert!(!conditions_match(&[a], &[]));
    }

    #[test]
    fn test_status_patch_nulls_cleared_fields() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Status {
            #[serde(skip_serializing_if = "Option::is_none")]
            broker_name: Option<String>,
            observed_generation: i64,
        }

        let patch = status_patch(
            &Status {
                broker_name: None,
                observed_generation: 3,
            },
            &["brokerName"],
        )
        .unwrap();
        assert_eq!(
            patch,
            json!({ "status": { "brokerName": null, "observedGeneration": 3 } })
        );

        let kept = status_patch(
            &Status {
                broker_name: Some("lambda-broker".to_string()),
                observed_generation: 3,
            },
            &["brokerName"],
        )
        .unwrap();
        assert_eq!(kept["status"]["brokerName"], "lambda-broker");
    }
}

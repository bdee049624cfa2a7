//! Schema-less resource documents
//!
//! Brokers, triggers and rendered RabbitMQ objects have no compiled types.
//! [`Document`] wraps a `DynamicObject` together with the `ApiResource` it is
//! served under and gives named accessors for the fields the operator reads
//! and writes.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::{json, Value};

use lambda_common::kube_utils::{build_api_resource, deterministic_hash};
use lambda_common::SPEC_HASH_ANNOTATION;

use crate::error::EventingError;
use crate::resource::ResourceKind;

/// A namespaced resource addressed by apiVersion and kind at runtime
#[derive(Clone, Debug)]
pub struct Document {
    object: DynamicObject,
    api_resource: ApiResource,
}

impl Document {
    /// Empty document of a known kind
    pub fn new(kind: ResourceKind, name: &str, namespace: &str) -> Self {
        let api_resource = kind.api_resource();
        let object = DynamicObject::new(name, &api_resource).within(namespace);
        Self {
            object,
            api_resource,
        }
    }

    /// Decode a document from rendered JSON
    ///
    /// `apiVersion`, `kind` and `metadata.name` are required. The namespace
    /// defaults to `default_namespace` when the document has none.
    pub fn from_value(value: Value, default_namespace: &str) -> Result<Self, EventingError> {
        let api_version = required_str(&value, &["apiVersion"])?.to_string();
        let kind = required_str(&value, &["kind"])?.to_string();
        required_str(&value, &["metadata", "name"])?;

        let mut object: DynamicObject = serde_json::from_value(value)
            .map_err(|e| EventingError::Parse(format!("{kind}: {e}")))?;
        if object.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
            object.metadata.namespace = Some(default_namespace.to_string());
        }

        Ok(Self {
            object,
            api_resource: build_api_resource(&api_version, &kind),
        })
    }

    /// Wrap an object read from the cluster
    pub fn from_object(object: DynamicObject, api_resource: ApiResource) -> Self {
        Self {
            object,
            api_resource,
        }
    }

    /// Resource name
    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }

    /// Resource namespace
    pub fn namespace(&self) -> &str {
        self.object.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Resource kind
    pub fn kind(&self) -> &str {
        &self.api_resource.kind
    }

    /// ApiResource this document is served under
    pub fn api_resource(&self) -> &ApiResource {
        &self.api_resource
    }

    /// Underlying object
    pub fn object(&self) -> &DynamicObject {
        &self.object
    }

    /// Consume into the underlying object
    pub fn into_object(self) -> DynamicObject {
        self.object
    }

    /// Labels, empty when unset
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.object.metadata.labels.clone().unwrap_or_default()
    }

    /// Single label value
    pub fn label(&self, key: &str) -> Option<&str> {
        self.object
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    /// Single annotation value
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.object
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Owner references, empty when unset
    pub fn owner_references(&self) -> &[OwnerReference] {
        self.object
            .metadata
            .owner_references
            .as_deref()
            .unwrap_or_default()
    }

    /// Whether any owner reference points at `uid`
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references().iter().any(|o| o.uid == uid)
    }

    /// `.spec`, when present
    pub fn spec(&self) -> Option<&Value> {
        self.object.data.get("spec")
    }

    /// Value at a path below the document root (e.g. `["status", "address", "url"]`)
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.object.data, |value, key| value.get(*key))
    }

    /// Whether `status.conditions` holds `type` with status `"True"`
    pub fn condition_is_true(&self, condition_type: &str) -> bool {
        self.field(&["status", "conditions"])
            .and_then(Value::as_array)
            .is_some_and(|conditions| {
                conditions.iter().any(|c| {
                    c.get("type").and_then(Value::as_str) == Some(condition_type)
                        && c.get("status").and_then(Value::as_str) == Some("True")
                })
            })
    }

    /// Current resourceVersion
    pub fn resource_version(&self) -> Option<&str> {
        self.object.metadata.resource_version.as_deref()
    }

    /// Set a label
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.object
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Set several labels
    pub fn with_labels<'a>(self, labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        labels
            .into_iter()
            .fold(self, |doc, (k, v)| doc.with_label(k, v))
    }

    /// Set an annotation
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.set_annotation(key, value);
        self
    }

    /// Set `.spec`
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.object.data["spec"] = spec;
        self
    }

    /// Append an owner reference
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.object
            .metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(owner);
        self
    }

    /// Set an annotation in place
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.object
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
    }

    /// Carry over the resourceVersion of the live object for a replace
    pub fn set_resource_version(&mut self, version: Option<String>) {
        self.object.metadata.resource_version = version;
    }

    /// Hash of the desired state: labels, annotations, spec and owners
    ///
    /// The spec-hash annotation itself is excluded so the value is stable
    /// once stamped.
    pub fn content_hash(&self) -> String {
        let mut annotations = self.object.metadata.annotations.clone().unwrap_or_default();
        annotations.remove(SPEC_HASH_ANNOTATION);
        let owners: Vec<Value> = self
            .owner_references()
            .iter()
            .map(|o| {
                json!({
                    "apiVersion": o.api_version,
                    "kind": o.kind,
                    "name": o.name,
                    "uid": o.uid,
                    "controller": o.controller,
                    "blockOwnerDeletion": o.block_owner_deletion,
                })
            })
            .collect();
        let material = json!({
            "labels": self.labels(),
            "annotations": annotations,
            "spec": self.spec(),
            "ownerReferences": owners,
        });
        deterministic_hash(&material.to_string())
    }
}

fn required_str<'a>(value: &'a Value, path: &[&str]) -> Result<&'a str, EventingError> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EventingError::Parse(format!("document is missing {}", path.join("."))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "lambda.knative.io/v1alpha1".to_string(),
            kind: "LambdaFunction".to_string(),
            name: "resize-image".to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn test_from_value_defaults_namespace() {
        let doc = Document::from_value(
            json!({
                "apiVersion": "rabbitmq.com/v1beta1",
                "kind": "Queue",
                "metadata": { "name": "lambda-dlq-queue" },
                "spec": { "name": "lambda-dlq-queue", "durable": true }
            }),
            "media",
        )
        .unwrap();
        assert_eq!(doc.namespace(), "media");
        assert_eq!(doc.kind(), "Queue");
        assert_eq!(doc.api_resource().group, "rabbitmq.com");
        assert_eq!(doc.api_resource().plural, "queues");
        assert_eq!(doc.spec().unwrap()["durable"], true);
    }

    #[test]
    fn test_from_value_keeps_explicit_namespace() {
        let doc = Document::from_value(
            json!({
                "apiVersion": "eventing.knative.dev/v1",
                "kind": "Broker",
                "metadata": { "name": "lambda-broker", "namespace": "other" }
            }),
            "media",
        )
        .unwrap();
        assert_eq!(doc.namespace(), "other");
    }

    #[test]
    fn test_from_value_requires_identity_fields() {
        for (value, missing) in [
            (json!({"kind": "Broker", "metadata": {"name": "b"}}), "apiVersion"),
            (json!({"apiVersion": "v1", "metadata": {"name": "b"}}), "kind"),
            (json!({"apiVersion": "v1", "kind": "Broker", "metadata": {}}), "metadata.name"),
        ] {
            let err = Document::from_value(value, "media").unwrap_err();
            assert!(matches!(err, EventingError::Parse(_)));
            assert!(err.to_string().contains(missing), "{err}");
        }
    }

    #[test]
    fn test_builders_and_accessors() {
        let doc = Document::new(ResourceKind::Trigger, "resize-image-trigger", "media")
            .with_labels([("app.kubernetes.io/name", "resize-image")])
            .with_annotation("rabbitmq.eventing.knative.dev/parallelism", "50")
            .with_spec(json!({ "broker": "lambda-broker" }))
            .with_owner(owner("uid-1"));

        assert_eq!(doc.name(), "resize-image-trigger");
        assert_eq!(doc.namespace(), "media");
        assert_eq!(doc.label("app.kubernetes.io/name"), Some("resize-image"));
        assert_eq!(
            doc.annotation("rabbitmq.eventing.knative.dev/parallelism"),
            Some("50")
        );
        assert_eq!(doc.field(&["spec", "broker"]), Some(&json!("lambda-broker")));
        assert!(doc.is_owned_by("uid-1"));
        assert!(!doc.is_owned_by("uid-2"));
        assert_eq!(doc.object().types.as_ref().unwrap().kind, "Trigger");
    }

    #[test]
    fn test_condition_is_true() {
        let mut obj = DynamicObject::new("triage-broker", &ResourceKind::Broker.api_resource());
        obj.data = json!({
            "status": {
                "conditions": [
                    { "type": "Addressable", "status": "True" },
                    { "type": "Ready", "status": "False" }
                ]
            }
        });
        let doc = Document::from_object(obj, ResourceKind::Broker.api_resource());
        assert!(doc.condition_is_true("Addressable"));
        assert!(!doc.condition_is_true("Ready"));
        assert!(!doc.condition_is_true("Missing"));
    }

    #[test]
    fn test_content_hash_ignores_its_own_annotation() {
        let doc = Document::new(ResourceKind::Trigger, "t", "media")
            .with_spec(json!({ "broker": "lambda-broker" }))
            .with_owner(owner("uid-1"));
        let hash = doc.content_hash();

        let stamped = doc.clone().with_annotation(SPEC_HASH_ANNOTATION, &hash);
        assert_eq!(stamped.content_hash(), hash);

        let changed = doc.clone().with_spec(json!({ "broker": "other" }));
        assert_ne!(changed.content_hash(), hash);

        let reowned = Document::new(ResourceKind::Trigger, "t", "media")
            .with_spec(json!({ "broker": "lambda-broker" }))
            .with_owner(owner("uid-2"));
        assert_ne!(reowned.content_hash(), hash);
    }
}

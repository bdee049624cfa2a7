//! Applies rendered multi-document manifests as shared resources
//!
//! The whole batch is decoded before any object is sent, so malformed YAML
//! in a later document never leaves earlier ones half-applied. Existing
//! objects are left untouched.

use tracing::debug;

use lambda_common::yaml::parse_manifest_documents;

use crate::client::ClusterApi;
use crate::document::Document;
use crate::error::EventingError;
use crate::lifecycle::{ensure, Drift, Ensured, Ownership};

/// Decode rendered manifests into documents, defaulting their namespace
pub fn parse_documents(manifests: &str, namespace: &str) -> Result<Vec<Document>, EventingError> {
    parse_manifest_documents(manifests)
        .map_err(|e| EventingError::Parse(e.to_string()))?
        .into_iter()
        .map(|value| Document::from_value(value, namespace))
        .collect()
}

/// Create every document that does not exist yet, returning how many were created
pub async fn apply_documents(
    api: &dyn ClusterApi,
    manifests: &str,
    namespace: &str,
) -> Result<usize, EventingError> {
    let documents = parse_documents(manifests, namespace)?;
    let mut created = 0;
    for document in documents {
        let kind = document.kind().to_string();
        let name = document.name().to_string();
        match ensure(api, document, Ownership::Shared, Drift::Ignore).await? {
            Ensured::Created => created += 1,
            outcome => debug!(kind = %kind, name = %name, ?outcome, "shared resource present"),
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CreateOutcome, MockClusterApi};
    use crate::error::api_error;

    const MANIFESTS: &str = r#"
# leading comment-only document
---
apiVersion: rabbitmq.com/v1beta1
kind: Exchange
metadata:
  name: lambda-dlq-exchange
spec:
  name: lambda-dlq-exchange
---
---
apiVersion: rabbitmq.com/v1beta1
kind: Queue
metadata:
  name: lambda-dlq-queue
  namespace: media
spec:
  name: lambda-dlq-queue
"#;

    #[test]
    fn test_parse_skips_empty_documents_and_defaults_namespace() {
        let docs = parse_documents(MANIFESTS, "media").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].kind(), "Exchange");
        assert_eq!(docs[0].namespace(), "media");
        assert_eq!(docs[1].kind(), "Queue");
    }

    #[test]
    fn test_parse_rejects_document_without_kind() {
        let err = parse_documents(
            "apiVersion: v1\nmetadata:\n  name: orphan\n",
            "media",
        )
        .unwrap_err();
        assert!(matches!(err, EventingError::Parse(_)));
    }

    #[tokio::test]
    async fn story_malformed_yaml_applies_nothing() {
        let broken = format!("{MANIFESTS}\n---\nkind: [unclosed\n");
        let mut api = MockClusterApi::new();
        api.expect_get().never();
        api.expect_create().never();

        let err = apply_documents(&api, &broken, "media").await.unwrap_err();
        assert!(matches!(err, EventingError::Parse(_)));
    }

    #[tokio::test]
    async fn story_existing_documents_are_not_recreated() {
        let mut api = MockClusterApi::new();
        api.expect_get().returning(|ar, ns, name| {
            if ar.kind == "Exchange" {
                Ok(Some(Document::from_value(
                    serde_json::json!({
                        "apiVersion": "rabbitmq.com/v1beta1",
                        "kind": "Exchange",
                        "metadata": { "name": name }
                    }),
                    ns,
                )?))
            } else {
                Ok(None)
            }
        });
        api.expect_create()
            .withf(|doc| doc.kind() == "Queue" && doc.owner_references().is_empty())
            .times(1)
            .returning(|_| Ok(CreateOutcome::Created));
        api.expect_replace().never();

        let created = apply_documents(&api, MANIFESTS, "media").await.unwrap();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn story_create_race_counts_as_success() {
        let mut api = MockClusterApi::new();
        api.expect_get().returning(|_, _, _| Ok(None));
        api.expect_create()
            .times(2)
            .returning(|_| Ok(CreateOutcome::AlreadyExists));

        let created = apply_documents(&api, MANIFESTS, "media").await.unwrap();
        assert_eq!(created, 0);
    }

    #[tokio::test]
    async fn story_apply_failure_stops_the_batch() {
        let mut api = MockClusterApi::new();
        api.expect_get().returning(|_, _, _| Ok(None));
        api.expect_create().times(1).returning(|doc| {
            Err(EventingError::apply(
                doc.kind(),
                doc.name(),
                doc.namespace(),
                api_error(403, "Forbidden"),
            ))
        });

        let err = apply_documents(&api, MANIFESTS, "media").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Exchange media/lambda-dlq-exchange"), "{msg}");
    }
}

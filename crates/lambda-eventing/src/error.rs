//! Eventing error types

/// Errors raised while provisioning or tearing down eventing topology
#[derive(Debug, thiserror::Error)]
pub enum EventingError {
    /// A manifest template failed to render
    #[error("failed to render {template} manifest for {name}: {message}")]
    Render {
        /// Template that failed
        template: String,
        /// Resource the manifest was rendered for
        name: String,
        /// Renderer message
        message: String,
    },

    /// Rendered text could not be decoded into resource documents
    #[error("failed to parse rendered manifests: {0}")]
    Parse(String),

    /// The cluster rejected a create, replace or delete
    #[error("failed to apply {kind} {namespace}/{name}: {source}")]
    Apply {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Resource namespace
        namespace: String,
        /// Underlying API error
        source: kube::Error,
    },

    /// A read or list against the cluster failed
    #[error("kubernetes error: {0}")]
    Api(#[from] kube::Error),

    /// The owning resource cannot be referenced (not yet persisted)
    #[error("cannot build owner reference: {0}")]
    OwnerReference(#[source] lambda_common::Error),

    /// Namespaced owner without a namespace
    #[error("{kind} {name} has no namespace")]
    MissingNamespace {
        /// Owner kind
        kind: String,
        /// Owner name
        name: String,
    },

    /// A desired object could not be converted to or from JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventingError {
    /// Build an Apply error from a failed API call
    pub fn apply(kind: &str, name: &str, namespace: &str, source: kube::Error) -> Self {
        Self::Apply {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            source,
        }
    }

    /// Whether retrying the same reconcile could succeed
    ///
    /// Render, parse and ownership failures need a spec or template change.
    /// API errors are retryable except client errors other than 409 and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Apply { source, .. } | Self::Api(source) => kube_error_retryable(source),
            Self::Render { .. }
            | Self::Parse(_)
            | Self::OwnerReference(_)
            | Self::MissingNamespace { .. }
            | Self::Serialization(_) => false,
        }
    }

    /// Whether a read or list failed because the resource type or object is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(e) if is_not_found(e))
    }
}

fn kube_error_retryable(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => !(400..500).contains(&ae.code) || matches!(ae.code, 409 | 429),
        _ => true,
    }
}

/// True when the error is an API 404
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True when the error is an API 409 with reason AlreadyExists
pub(crate) fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} ({code})"),
        reason: reason.to_string(),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_error_names_the_resource() {
        let err = EventingError::apply(
            "Trigger",
            "resize-image-trigger",
            "media",
            api_error(422, "Invalid"),
        );
        let msg = err.to_string();
        assert!(msg.contains("Trigger media/resize-image-trigger"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EventingError::Api(api_error(500, "InternalError")).is_retryable());
        assert!(EventingError::Api(api_error(409, "Conflict")).is_retryable());
        assert!(EventingError::Api(api_error(429, "TooManyRequests")).is_retryable());
        assert!(!EventingError::Api(api_error(403, "Forbidden")).is_retryable());
        assert!(!EventingError::Parse("bad yaml".to_string()).is_retryable());
        assert!(!EventingError::Render {
            template: "broker".to_string(),
            name: "lambda-broker".to_string(),
            message: "undefined value".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_status_classifiers() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(!is_not_found(&api_error(409, "AlreadyExists")));
        assert!(is_already_exists(&api_error(409, "AlreadyExists")));
        // resourceVersion conflicts share the status code but not the reason
        assert!(!is_already_exists(&api_error(409, "Conflict")));
        assert!(EventingError::Api(api_error(404, "NotFound")).is_not_found());
    }
}

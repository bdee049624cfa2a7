//! Custom Resource Definitions for the lambda operator

mod agent;
mod function;
mod types;

pub use agent::{
    AgentEventingSpec, AgentEventingStatus, AgentForward, AgentRabbitMqSpec, AgentSubscription,
    LambdaAgent, LambdaAgentSpec, LambdaAgentStatus, AGENT_FINALIZER,
};
pub use function::{
    DlqCleanupSpec, DlqSpec, EventingSpec, LambdaFunction, LambdaFunctionSpec,
    LambdaFunctionStatus, MonitoringSpec, RabbitMqSpec, FUNCTION_FINALIZER,
};
pub use types::{Condition, ConditionStatus, EVENTING_READY_CONDITION};

// =============================================================================

/// Maximum length of a DNS-1123 label
pub(crate) const DNS_LABEL_MAX_LEN: usize = 63;

/// Validate that `value` is a DNS-1123 label, naming `field` in the error.
///
/// Lowercase alphanumerics and hyphens, starting and ending alphanumeric,
/// at most 63 characters.
pub(crate) fn validate_dns_label(value: &str, field: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} cannot be empty"));
    }
    if value.len() > DNS_LABEL_MAX_LEN {
        return Err(format!(
            "{field} '{value}' exceeds {DNS_LABEL_MAX_LEN} characters"
        ));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "{field} '{value}' must be lowercase alphanumeric with hyphens"
        ));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(format!("{field} '{value}' cannot start or end with a hyphen"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_validate_dns_label() {
        assert!(validate_dns_label("order-agent", "name").is_ok());
        assert!(validate_dns_label("a1", "name").is_ok());
        assert!(validate_dns_label("", "name").is_err());
        assert!(validate_dns_label("-lead", "name").is_err());
        assert!(validate_dns_label("trail-", "name").is_err());
        assert!(validate_dns_label("Upper", "name").is_err());
        assert!(validate_dns_label("dots.not.allowed", "name").is_err());
        assert!(validate_dns_label(&"a".repeat(64), "name").is_err());

        let err = validate_dns_label("Bad", "targetAgent").unwrap_err();
        assert!(err.contains("targetAgent"));
    }

    #[test]
    fn test_crds_generate_with_expected_names() {
        let crd = LambdaFunction::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("lambdafunctions.lambda.knative.io")
        );
        let yaml = serde_yaml::to_string(&crd).unwrap();
        assert!(yaml.contains("messageTTL"));

        let crd = LambdaAgent::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("lambdaagents.lambda.knative.io")
        );
        assert_eq!(crd.spec.names.short_names, Some(vec!["la".to_string()]));
    }
}

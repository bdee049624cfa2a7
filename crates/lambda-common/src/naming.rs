//! Event-type derived names shared by validation and provisioning

/// Maximum length of a sanitized event type inside a resource name
pub const MAX_EVENT_TYPE_LEN: usize = 40;

/// Turn a CloudEvents type into a DNS-safe name fragment
///
/// Lowercases, maps `.`, `/` and `_` to `-`, `*` to `all`, and truncates to
/// [`MAX_EVENT_TYPE_LEN`] bytes. Distinct long types sharing a 40-byte prefix
/// collide after truncation.
///
/// ```
/// use lambda_common::naming::sanitize_event_type;
///
/// assert_eq!(sanitize_event_type("io.homelab.lab.request"), "io-homelab-lab-request");
/// assert_eq!(sanitize_event_type("*"), "all");
/// ```
pub fn sanitize_event_type(event_type: &str) -> String {
    let mut out = String::with_capacity(event_type.len());
    for c in event_type.chars() {
        match c {
            '.' | '/' | '_' => out.push('-'),
            '*' => out.push_str("all"),
            c => out.extend(c.to_lowercase()),
        }
    }
    if out.len() > MAX_EVENT_TYPE_LEN {
        let mut cut = MAX_EVENT_TYPE_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

/// Inbound trigger for one of an agent's subscriptions
pub fn inbound_trigger_name(agent: &str, event_type: &str) -> String {
    format!("{agent}-{}", sanitize_event_type(event_type))
}

/// Forward trigger relaying one event type to a target agent
pub fn forward_trigger_name(agent: &str, target_agent: &str, event_type: &str) -> String {
    format!(
        "{agent}-fwd-{target_agent}-{}",
        sanitize_event_type(event_type)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_long_medical_type() {
        let s = sanitize_event_type("io.homelab.medical.lab.request");
        assert_eq!(s, "io-homelab-medical-lab-request");
        assert!(s.len() <= MAX_EVENT_TYPE_LEN);
        assert!(!s.contains('.') && !s.contains('/'));
    }

    #[test]
    fn test_sanitize_maps_special_characters() {
        assert_eq!(sanitize_event_type("*"), "all");
        assert_eq!(sanitize_event_type("io.Knative/Build_Start"), "io-knative-build-start");
        assert_eq!(sanitize_event_type("io.agent.*"), "io-agent-all");
    }

    #[test]
    fn test_sanitize_truncates_to_forty_bytes() {
        let long = "io.homelab.platform.observability.alerts.critical.raised";
        let s = sanitize_event_type(long);
        assert_eq!(s.len(), MAX_EVENT_TYPE_LEN);
        assert!(long.replace('.', "-").starts_with(&s));
    }

    #[test]
    fn test_truncation_collides_on_shared_prefix() {
        // Known limitation: types differing only after byte 40 share a name
        let a = sanitize_event_type("io.homelab.platform.observability.alerts.critical");
        let b = sanitize_event_type("io.homelab.platform.observability.alerts.warning");
        assert_eq!(a, b);
    }

    #[test]
    fn test_trigger_names() {
        assert_eq!(
            inbound_trigger_name("triage", "io.homelab.alert.fired"),
            "triage-io-homelab-alert-fired"
        );
        assert_eq!(
            forward_trigger_name("triage", "lab-agent", "io.homelab.lab.request"),
            "triage-fwd-lab-agent-io-homelab-lab-request"
        );
    }
}

//! Manifest rendering for shared broker and DLQ resources
//!
//! Templates are compiled into the binary and rendered with minijinja.
//! Undefined variables are errors so a typo in a template never produces a
//! half-empty manifest.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::config::{DlqConfig, RabbitMqConfig};
use crate::error::EventingError;

const BROKER_TEMPLATE: &str = include_str!("../templates/broker.yaml");
const DLQ_TEMPLATE: &str = include_str!("../templates/dlq.yaml");

/// Template payload for a broker
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrokerData {
    /// Broker name
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Owning workload label (`shared` for namespace brokers)
    pub lambda_name: String,
    /// RabbitMQ settings
    pub rabbitmq: RabbitMqConfig,
    /// DLQ settings, used for delivery retry
    pub dlq: DlqConfig,
}

/// Template payload for a dead-letter queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DlqData {
    /// DLQ resource name prefix
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Owning workload label (`shared` for namespace DLQs)
    pub lambda_name: String,
    /// RabbitMQ settings
    pub rabbitmq: RabbitMqConfig,
    /// DLQ settings
    pub dlq: DlqConfig,
    /// Emit monitoring thresholds
    pub monitoring: bool,
}

/// Turns typed configuration into multi-document YAML
#[cfg_attr(test, automock)]
pub trait ManifestRenderer: Send + Sync {
    /// Render broker manifests
    fn render_broker(&self, data: &BrokerData) -> Result<String, EventingError>;

    /// Render DLQ manifests
    fn render_dlq(&self, data: &DlqData) -> Result<String, EventingError>;
}

/// [`ManifestRenderer`] backed by the bundled minijinja templates
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    /// Compile the bundled templates
    pub fn new() -> Result<Self, EventingError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        for (name, source) in [("broker", BROKER_TEMPLATE), ("dlq", DLQ_TEMPLATE)] {
            env.add_template(name, source)
                .map_err(|e| render_error(name, name, e))?;
        }
        Ok(Self { env })
    }

    fn render<S: Serialize>(
        &self,
        template: &str,
        name: &str,
        data: &S,
    ) -> Result<String, EventingError> {
        self.env
            .get_template(template)
            .and_then(|t| t.render(data))
            .map_err(|e| render_error(template, name, e))
    }
}

fn render_error(template: &str, name: &str, err: minijinja::Error) -> EventingError {
    EventingError::Render {
        template: template.to_string(),
        name: name.to_string(),
        message: err.to_string(),
    }
}

impl ManifestRenderer for TemplateRenderer {
    fn render_broker(&self, data: &BrokerData) -> Result<String, EventingError> {
        self.render("broker", &data.name, data)
    }

    fn render_dlq(&self, data: &DlqData) -> Result<String, EventingError> {
        self.render("dlq", &data.name, data)
    }
}

//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, URLs and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DevConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::DevConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check the configuration for semantic errors.
pub fn validate_config(config: &DevConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if let Some(framework) = &config.framework {
        if framework.port == 0 {
            errors.push(ValidationError::new("framework.port", "must be non-zero"));
        }
        if framework.host.is_empty() {
            errors.push(ValidationError::new("framework.host", "must not be empty"));
        }
    }

    if config.functions.server_port == Some(0) {
        errors.push(ValidationError::new("functions.server_port", "must be non-zero"));
    }

    let urls = [
        ("edge_functions.target", config.edge_functions.target.as_deref()),
        ("images.target", config.images.target.as_deref()),
        (
            "activity.api_url",
            config.activity.as_ref().map(|a| a.api_url.as_str()),
        ),
    ];
    for (field, value) in urls {
        if let Some(value) = value {
            if url::Url::parse(value).is_err() {
                errors.push(ValidationError::new(field, format!("'{}' is not a URL", value)));
            }
        }
    }

    for (name, origin) in &config.addons {
        if url::Url::parse(origin).is_err() {
            errors.push(ValidationError::new(
                format!("addons.{}", name),
                format!("'{}' is not a URL", origin),
            ));
        }
    }

    if config.edge_functions.target.is_none() && !config.edge_functions.routes.is_empty() {
        errors.push(ValidationError::new(
            "edge_functions.target",
            "routes are declared but no runtime target is set",
        ));
    }

    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::new("limits.max_body_bytes", "must be non-zero"));
    }
    if config.limits.request_secs == 0 {
        errors.push(ValidationError::new("limits.request_secs", "must be non-zero"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address when metrics are enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

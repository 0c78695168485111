//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::load_balancer::ActionRegistry;

/// Error type for configuration loading and pool construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("need parameter")]
    MissingParameter,

    #[error("expected non-empty list")]
    EmptyList,

    #[error("expected action at entry {index}, got {got}")]
    ExpectedAction { index: usize, got: &'static str },

    #[error("expected list, got {got}")]
    ExpectedList { got: &'static str },

    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("unknown action '{0}'")]
    UnknownAction(String),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(
    content: &str,
    registry: &ActionRegistry,
) -> Result<BalancerConfig, ConfigError> {
    let config: BalancerConfig = toml::from_str(content)?;
    validate_config(&config, registry).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path, registry: &ActionRegistry) -> Result<BalancerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[pools]]
            name = "web"
            targets = [{{ address = "http://127.0.0.1:8080" }}]
            "#
        )
        .unwrap();

        let config = load_config(file.path(), &ActionRegistry::with_defaults()).unwrap();
        assert_eq!(config.pools[0].name, "web");
    }

    #[test]
    fn test_missing_file() {
        let registry = ActionRegistry::with_defaults();
        let err = load_config(Path::new("/nonexistent/balancer.toml"), &registry).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("pools = 3", &ActionRegistry::with_defaults()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors_are_joined() {
        let err = parse_config(
            r#"
            [health]
            high_water = 5
            low_water = 5

            [[pools]]
            name = "web"
            action = "balancer.nope"
            "#,
            &ActionRegistry::with_defaults(),
        )
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.starts_with("Validation failed: "));
        assert!(msg.contains("balancer.nope"));
        assert!(msg.contains("low_water"));
    }
}

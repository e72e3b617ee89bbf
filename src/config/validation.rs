//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (connect timeout > 0, client port set)
//! - Check that required strings are present (host, credential paths)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::TransportConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("timeouts.connect_ms must be greater than 0")]
    ZeroConnectTimeout,

    #[error("client.port must be greater than 0")]
    ZeroClientPort,

    #[error("client.host must not be empty")]
    EmptyClientHost,

    #[error("tls.{0} must not be empty")]
    EmptyTlsPath(&'static str),

    #[error("observability.log_level '{0}' is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::ZeroConnectTimeout);
    }

    if config.client.port == 0 {
        errors.push(ValidationError::ZeroClientPort);
    }

    if config.client.host.trim().is_empty() {
        errors.push(ValidationError::EmptyClientHost);
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("cert_path"));
        }
        if tls.key_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("key_path"));
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(config.observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;
    use std::path::PathBuf;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&TransportConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = TransportConfig::default();
        config.timeouts.connect_ms = 0;
        config.client.host = "  ".to_string();
        config.tls = Some(TlsConfig {
            cert_path: PathBuf::new(),
            key_path: PathBuf::from("server.key"),
        });
        config.observability.log_level = "loud".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::ZeroConnectTimeout,
                ValidationError::EmptyClientHost,
                ValidationError::EmptyTlsPath("cert_path"),
                ValidationError::UnknownLogLevel("loud".to_string()),
            ]
        );
    }

    #[test]
    fn log_level_is_case_insensitive() {
        let mut config = TransportConfig::default();
        config.observability.log_level = "DEBUG".to_string();
        assert!(validate_config(&config).is_ok());
    }
}

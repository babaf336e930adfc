use thiserror::Error;

use crate::config::ConfigError;

/// Common error type for the sensor agent.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to initialize tracing: {0}")]
    Tracing(String),
}

/// Result type alias using the agent's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn port_from(content: &str) -> Result<u16> {
        Ok(crate::AgentConfig::parse(content)?.port)
    }

    #[test]
    fn test_config_error_converts() {
        let err = port_from(r#"{ "Port": 0 }"#).unwrap_err();

        assert!(matches!(err, Error::Config(ConfigError::Validation(_))));
        assert!(err.to_string().starts_with("Configuration error:"));
    }
}

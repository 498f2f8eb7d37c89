use std::path::PathBuf;

/// Failure to produce a usable configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    /// Every problem found, joined with `"; "`.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError(
            "session.ttl_secs = 0 is out of range [1, 86400]; agent.max_iterations = 0 is out of range [1, 100]".into(),
        );
        assert!(err.to_string().starts_with("config validation error: session.ttl_secs"));
    }
}

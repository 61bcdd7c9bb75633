#![allow(clippy::result_large_err)]

use super::PatchwrightConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules
    pub fn validate(config: &PatchwrightConfig) -> Result<(), AppError> {
        if config.engine.image.trim().is_empty() {
            return Err(invalid("engine.image cannot be empty"));
        }

        if config.engine.entry_point.trim().is_empty() {
            return Err(invalid("engine.entry_point cannot be empty"));
        }

        // The container path is joined by the container runtime, not the host
        if !config.engine.container_output_dir.starts_with('/') {
            return Err(invalid(
                "engine.container_output_dir must be an absolute path",
            ));
        }

        config.orchestrator.mode_preference()?;

        if config.publisher.commit_name.trim().is_empty()
            || config.publisher.commit_email.trim().is_empty()
        {
            return Err(invalid(
                "publisher.commit_name and publisher.commit_email are required",
            ));
        }

        if config.publisher.branch_prefix.trim().is_empty() {
            return Err(invalid("publisher.branch_prefix cannot be empty"));
        }

        if config.publisher.push_remote == config.publisher.default_remote {
            return Err(invalid(
                "publisher.push_remote must differ from publisher.default_remote",
            ));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::new(ErrorCategory::ValidationError, message).with_code("CONFIG-002")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_valid_config() {
        let config = PatchwrightConfig::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_empty_image() {
        let mut config = PatchwrightConfig::default();
        config.engine.image = " ".to_string();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("engine.image"));
    }

    #[test]
    fn test_validate_relative_container_output_dir() {
        let mut config = PatchwrightConfig::default();
        config.engine.container_output_dir = "output".to_string();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("container_output_dir"));
    }

    #[test]
    fn test_validate_unknown_mode() {
        let mut config = PatchwrightConfig::default();
        config.orchestrator.mode = "cloud".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_validate_missing_commit_identity() {
        let mut config = PatchwrightConfig::default();
        config.publisher.commit_email = String::new();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("commit_email"));
    }

    #[test]
    fn test_validate_push_remote_collision() {
        let mut config = PatchwrightConfig::default();
        config.publisher.push_remote = "origin".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }
}

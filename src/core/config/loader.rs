#![allow(clippy::result_large_err)]

use super::{ConfigValidator, PatchwrightConfig};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "patchwright.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/patchwright.toml).
    /// Environment variables override config file values.
    pub fn load_from_workspace(workspace_path: &Path) -> Result<PatchwrightConfig, AppError> {
        Self::load(&workspace_path.join(CONFIG_FILE_NAME))
    }

    /// Defaults, then the file at `path` when it exists, then the environment.
    /// The merged result is validated.
    pub fn load(path: &Path) -> Result<PatchwrightConfig, AppError> {
        let mut config = Self::load_from_file(path)?.unwrap_or_default();
        Self::apply_env_overrides(&mut config);
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Returns Ok(None) if the file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<PatchwrightConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
            .with_code("CONFIG-001")
        })?;

        let config: PatchwrightConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
            .with_code("CONFIG-001")
        })?;

        Ok(Some(config))
    }

    /// Environment variables take precedence over config file values.
    /// Unparseable numeric and boolean values are ignored.
    pub fn apply_env_overrides(config: &mut PatchwrightConfig) {
        // Engine
        if let Some(image) = non_empty_var("PATCHWRIGHT_ENGINE_IMAGE") {
            config.engine.image = image;
        }
        if let Some(program) = non_empty_var("PATCHWRIGHT_DOCKER_PROGRAM") {
            config.engine.docker_program = PathBuf::from(program);
        }
        if let Some(root) = non_empty_var("PATCHWRIGHT_OUTPUT_ROOT") {
            config.engine.output_root = PathBuf::from(root);
        }
        if let Some(dir) = non_empty_var("PATCHWRIGHT_CONTAINER_OUTPUT_DIR") {
            config.engine.container_output_dir = dir;
        }
        if let Some(code_dir) = non_empty_var("ENGINE_CODE_DIR") {
            config.engine.code_dir = Some(PathBuf::from(code_dir));
        }
        if let Some(interpreter) = non_empty_var("PATCHWRIGHT_ENGINE_INTERPRETER") {
            config.engine.interpreter = interpreter;
        }
        if let Some(entry_point) = non_empty_var("PATCHWRIGHT_ENGINE_ENTRY_POINT") {
            config.engine.entry_point = entry_point;
        }

        // Repository
        if let Some(path) = non_empty_var("TARGET_REPO_PATH") {
            config.repository.target_path = Some(PathBuf::from(path));
        }

        // GitHub
        if let Some(api_base) = non_empty_var("GITHUB_API_URL") {
            config.github.api_base = api_base;
        }
        if let Some(token) = non_empty_var("GITHUB_TOKEN") {
            config.github.token = Some(token);
        }
        if let Some(token) = non_empty_var("GITHUB_INSTALLATION_TOKEN") {
            config.github.installation_token = Some(token);
        }
        if let Some(timeout) = non_empty_var("PATCHWRIGHT_GITHUB_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                config.github.request_timeout_ms = timeout;
            }
        }

        // Orchestrator
        if let Some(mode) = non_empty_var("PATCHWRIGHT_MODE") {
            config.orchestrator.mode = mode;
        }
        if let Ok(model) = env::var("PATCHWRIGHT_DEFAULT_MODEL") {
            config.orchestrator.default_model = Some(model);
        }
        if let Some(serialize) = non_empty_var("PATCHWRIGHT_SERIALIZE_PER_TASK") {
            if let Ok(serialize) = serialize.parse::<bool>() {
                config.orchestrator.serialize_per_task = serialize;
            }
        }

        // Publisher
        if let Some(name) = non_empty_var("PATCHWRIGHT_COMMIT_NAME") {
            config.publisher.commit_name = name;
        }
        if let Some(email) = non_empty_var("PATCHWRIGHT_COMMIT_EMAIL") {
            config.publisher.commit_email = email;
        }
        if let Some(prefix) = non_empty_var("PATCHWRIGHT_BRANCH_PREFIX") {
            config.publisher.branch_prefix = prefix;
        }
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "PATCHWRIGHT_ENGINE_IMAGE - Container image holding the engine (default: autocoderover/acr:v1)",
            "PATCHWRIGHT_DOCKER_PROGRAM - Container runtime binary (default: docker)",
            "PATCHWRIGHT_OUTPUT_ROOT - Host directory for engine output (default: .patchwright/output)",
            "PATCHWRIGHT_CONTAINER_OUTPUT_DIR - Output mount point inside the container (default: /output)",
            "ENGINE_CODE_DIR - Engine checkout used when running without a container",
            "PATCHWRIGHT_ENGINE_INTERPRETER - Interpreter that launches the engine (default: python)",
            "PATCHWRIGHT_ENGINE_ENTRY_POINT - Engine entry script (default: app/main.py)",
            "TARGET_REPO_PATH - Pre-checked-out repository for single-tenant runs",
            "GITHUB_API_URL - GitHub REST API base (default: https://api.github.com)",
            "GITHUB_TOKEN - Token for GitHub API calls",
            "GITHUB_INSTALLATION_TOKEN - Token used to clone and push in multi-tenant mode",
            "PATCHWRIGHT_GITHUB_TIMEOUT_MS - GitHub request timeout in milliseconds (default: 30000)",
            "PATCHWRIGHT_MODE - Execution mode: auto, action or app (default: auto)",
            "PATCHWRIGHT_DEFAULT_MODEL - Model used when a request names none; empty disables the fallback",
            "PATCHWRIGHT_SERIALIZE_PER_TASK - Serialize runs of the same issue (true/false, default: false)",
            "PATCHWRIGHT_COMMIT_NAME - Commit author name for published patches",
            "PATCHWRIGHT_COMMIT_EMAIL - Commit author email for published patches",
            "PATCHWRIGHT_BRANCH_PREFIX - Prefix of patch branches (default: patchwright/issue)",
        ]
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

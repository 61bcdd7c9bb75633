#![allow(clippy::result_large_err)]

pub mod loader;
pub mod validation;

pub use loader::{ConfigLoader, CONFIG_FILE_NAME};
pub use validation::ConfigValidator;

use crate::core::backend::EngineContract;
use crate::core::error::AppError;
use crate::core::git::CommitIdentity;
use crate::core::models::DEFAULT_MODEL;
use crate::core::orchestrator::OrchestratorSettings;
use crate::core::publisher::PublisherSettings;
use crate::core::types::{ErrorCategory, ModePreference};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration loaded from patchwright.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatchwrightConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub github: GithubConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,
}

/// How the external analysis engine is reached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Container image holding the engine
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_docker_program")]
    pub docker_program: PathBuf,

    #[serde(default = "default_container_name_prefix")]
    pub container_name_prefix: String,

    /// Host directory holding one output namespace per task
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Output path inside the container, mounted from the host namespace
    #[serde(default = "default_container_output_dir")]
    pub container_output_dir: String,

    /// Engine checkout used by the local backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_dir: Option<PathBuf>,

    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    #[serde(default = "default_setup_dir")]
    pub setup_dir: String,
}

/// Single-tenant target repository
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepositoryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Token for API calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Short-lived token used to clone and push in multi-tenant mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_token: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_gh_program")]
    pub gh_program: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// auto, action or app
    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default = "default_model")]
    pub default_model: Option<String>,

    #[serde(default)]
    pub serialize_per_task: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_commit_name")]
    pub commit_name: String,

    #[serde(default = "default_commit_email")]
    pub commit_email: String,

    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    #[serde(default = "default_remote")]
    pub default_remote: String,

    #[serde(default = "default_push_remote")]
    pub push_remote: String,
}

// Default functions
fn default_image() -> String {
    "autocoderover/acr:v1".to_string()
}

fn default_docker_program() -> PathBuf {
    PathBuf::from("docker")
}

fn default_container_name_prefix() -> String {
    "patchwright".to_string()
}

fn default_output_root() -> PathBuf {
    PathBuf::from(".patchwright/output")
}

fn default_container_output_dir() -> String {
    "/output".to_string()
}

fn default_interpreter() -> String {
    EngineContract::default().interpreter
}

fn default_entry_point() -> String {
    EngineContract::default().entry_point
}

fn default_setup_dir() -> String {
    EngineContract::default().setup_dir
}

fn default_api_base() -> String {
    crate::core::github::DEFAULT_API_BASE.to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_gh_program() -> PathBuf {
    PathBuf::from("gh")
}

fn default_mode() -> String {
    ModePreference::Auto.to_string()
}

fn default_model() -> Option<String> {
    Some(DEFAULT_MODEL.to_string())
}

fn default_commit_name() -> String {
    CommitIdentity::default().name
}

fn default_commit_email() -> String {
    CommitIdentity::default().email
}

fn default_branch_prefix() -> String {
    PublisherSettings::default().branch_prefix
}

fn default_remote() -> String {
    PublisherSettings::default().default_remote
}

fn default_push_remote() -> String {
    PublisherSettings::default().push_remote
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            image: default_image(),
            docker_program: default_docker_program(),
            container_name_prefix: default_container_name_prefix(),
            output_root: default_output_root(),
            container_output_dir: default_container_output_dir(),
            code_dir: None,
            interpreter: default_interpreter(),
            entry_point: default_entry_point(),
            setup_dir: default_setup_dir(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        GithubConfig {
            api_base: default_api_base(),
            token: None,
            installation_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            gh_program: default_gh_program(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            mode: default_mode(),
            default_model: default_model(),
            serialize_per_task: false,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            commit_name: default_commit_name(),
            commit_email: default_commit_email(),
            branch_prefix: default_branch_prefix(),
            default_remote: default_remote(),
            push_remote: default_push_remote(),
        }
    }
}

impl EngineConfig {
    pub fn contract(&self) -> EngineContract {
        EngineContract {
            interpreter: self.interpreter.clone(),
            entry_point: self.entry_point.clone(),
            setup_dir: self.setup_dir.clone(),
        }
    }
}

impl OrchestratorConfig {
    pub fn mode_preference(&self) -> Result<ModePreference, AppError> {
        self.mode.parse::<ModePreference>().map_err(|msg| {
            AppError::new(ErrorCategory::ValidationError, msg).with_code("CONFIG-002")
        })
    }

    pub fn settings(&self) -> Result<OrchestratorSettings, AppError> {
        Ok(OrchestratorSettings {
            mode: self.mode_preference()?,
            default_model: self
                .default_model
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            serialize_per_task: self.serialize_per_task,
        })
    }
}

impl PublisherConfig {
    pub fn settings(&self) -> PublisherSettings {
        PublisherSettings {
            identity: CommitIdentity {
                name: self.commit_name.clone(),
                email: self.commit_email.clone(),
            },
            branch_prefix: self.branch_prefix.clone(),
            default_remote: self.default_remote.clone(),
            push_remote: self.push_remote.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_section_defaults() {
        let config: PatchwrightConfig = toml::from_str(
            r#"
            [engine]
            image = "engine:dev"

            [orchestrator]
            mode = "action"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.image, "engine:dev");
        assert_eq!(config.engine.container_output_dir, "/output");
        assert_eq!(
            config.orchestrator.settings().unwrap().mode,
            ModePreference::Action
        );
        assert_eq!(config.publisher.default_remote, "origin");
    }

    #[test]
    fn blank_default_model_means_none() {
        let config = OrchestratorConfig {
            default_model: Some("  ".to_string()),
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.settings().unwrap().default_model, None);
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let config = OrchestratorConfig {
            mode: "docker".to_string(),
            ..OrchestratorConfig::default()
        };
        let err = config.settings().unwrap_err();
        assert_eq!(err.category, ErrorCategory::ValidationError);
    }
}

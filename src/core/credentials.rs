//! Per-invocation credential resolution.
//!
//! Nothing here is cached: a repository may rotate its secret between two runs,
//! so every invocation reads the source again.

use crate::core::error::AppError;
use crate::core::models::{self, Provider};
use crate::core::request::RepositoryRef;
use crate::core::types::{ErrorCategory, ExecutionMode};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Read-only, repository-scoped key/value lookup used in multi-tenant mode.
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Return the variable's value, or `None` when the repository does not define it.
    async fn read_variable(
        &self,
        repository: &RepositoryRef,
        name: &str,
    ) -> Result<Option<String>, AppError>;
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no model was requested, so no provider credential can be selected")]
    NoCredentialConfigured,
    #[error("model '{0}' is not served by any known provider")]
    UnknownModel(String),
    #[error("{0} credential is missing")]
    MissingCredential(Provider),
    #[error("failed to read {provider} credential: {source}")]
    LookupFailed {
        provider: Provider,
        #[source]
        source: AppError,
    },
}

impl CredentialError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CredentialError::NoCredentialConfigured => ErrorCategory::NoCredentialConfigured,
            CredentialError::UnknownModel(_) => ErrorCategory::UnknownModel,
            CredentialError::MissingCredential(_) | CredentialError::LookupFailed { .. } => {
                ErrorCategory::MissingCredential
            }
        }
    }

    /// Remediation text shown to the person who triggered the run.
    pub fn user_message(&self) -> String {
        match self {
            CredentialError::NoCredentialConfigured => {
                "No API key is set up. Please set up either an OpenAI or an Anthropic API key."
                    .to_string()
            }
            CredentialError::UnknownModel(model) => format!(
                "Model `{}` is not supported. Supported models: {}.",
                model,
                models::OPENAI_MODELS
                    .iter()
                    .chain(models::ANTHROPIC_MODELS.iter())
                    .map(|m| format!("`{}`", m))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            CredentialError::MissingCredential(provider) => format!(
                "{} API key is missing. Please set `{}` up in the repository.",
                provider,
                provider.repository_variable()
            ),
            CredentialError::LookupFailed { provider, .. } => format!(
                "The {} API key could not be read from the repository settings. Please try again later.",
                provider
            ),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        let code = match err {
            CredentialError::NoCredentialConfigured => "CRED-001",
            CredentialError::UnknownModel(_) => "CRED-002",
            CredentialError::MissingCredential(_) => "CRED-003",
            CredentialError::LookupFailed { .. } => "CRED-004",
        };
        AppError::new(err.category(), err.to_string())
            .with_code(code)
            .with_suggestion(err.user_message())
    }
}

/// Secrets resolved for a single invocation.
///
/// Holds a value for every provider: the one serving the model gets its secret,
/// the others get an explicit empty string so the engine never falls back to a
/// credential inherited from the host.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    provider: Provider,
    secrets: BTreeMap<Provider, String>,
}

impl Credentials {
    pub fn new(provider: Provider, secret: impl Into<String>) -> Self {
        let mut secrets: BTreeMap<Provider, String> =
            Provider::ALL.iter().map(|p| (*p, String::new())).collect();
        secrets.insert(provider, secret.into());
        Self { provider, secrets }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn secret(&self) -> &str {
        self.secrets
            .get(&self.provider)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// `(engine variable name, value)` for every provider, in a stable order.
    pub fn engine_env(&self) -> Vec<(&'static str, String)> {
        self.secrets
            .iter()
            .map(|(provider, value)| (provider.engine_env_var(), value.clone()))
            .collect()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub struct CredentialResolver;

impl CredentialResolver {
    /// Resolve the credential needed to run `model`.
    ///
    /// Single-tenant mode reads the provider's host environment variable;
    /// multi-tenant mode reads the repository variable through `store`. An
    /// empty or absent value is `MissingCredential`.
    pub async fn resolve(
        model: Option<&str>,
        mode: ExecutionMode,
        repository: &RepositoryRef,
        store: Option<&dyn VariableStore>,
    ) -> Result<Credentials, CredentialError> {
        let model = match model.map(str::trim) {
            Some(m) if !m.is_empty() => m,
            _ => return Err(CredentialError::NoCredentialConfigured),
        };
        let provider = models::provider_for(model)
            .ok_or_else(|| CredentialError::UnknownModel(model.to_string()))?;

        let secret = match mode {
            ExecutionMode::Action => std::env::var(provider.host_env_var()).unwrap_or_default(),
            ExecutionMode::App => match store {
                Some(store) => store
                    .read_variable(repository, provider.repository_variable())
                    .await
                    .map_err(|source| CredentialError::LookupFailed { provider, source })?
                    .unwrap_or_default(),
                None => {
                    tracing::warn!(
                        %provider,
                        "multi-tenant mode without a variable store; treating credential as missing"
                    );
                    String::new()
                }
            },
        };

        if secret.trim().is_empty() {
            return Err(CredentialError::MissingCredential(provider));
        }

        tracing::debug!(%provider, %mode, model, "credential resolved");
        Ok(Credentials::new(provider, secret.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapStore {
        values: HashMap<String, String>,
        reads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VariableStore for MapStore {
        async fn read_variable(
            &self,
            _repository: &RepositoryRef,
            name: &str,
        ) -> Result<Option<String>, AppError> {
            self.reads.lock().unwrap().push(name.to_string());
            Ok(self.values.get(name).cloned())
        }
    }

    fn repo() -> RepositoryRef {
        RepositoryRef::new("octo", "demo")
    }

    #[tokio::test]
    async fn missing_model_fails_fast() {
        let err = CredentialResolver::resolve(None, ExecutionMode::Action, &repo(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::NoCredentialConfigured));
        let err = CredentialResolver::resolve(Some("  "), ExecutionMode::Action, &repo(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::NoCredentialConfigured));
    }

    #[tokio::test]
    #[serial]
    async fn action_mode_reads_host_environment() {
        std::env::set_var("ANTHROPIC_API_KEY", "sk-ant-test");
        let creds = CredentialResolver::resolve(
            Some("claude-3-opus-20240229"),
            ExecutionMode::Action,
            &repo(),
            None,
        )
        .await
        .unwrap();
        std::env::remove_var("ANTHROPIC_API_KEY");

        assert_eq!(creds.provider(), Provider::Anthropic);
        assert_eq!(creds.secret(), "sk-ant-test");
    }

    #[tokio::test]
    #[serial]
    async fn action_mode_with_unset_variable_is_missing() {
        std::env::remove_var("OPENAI_API_KEY");
        let err = CredentialResolver::resolve(
            Some("gpt-4o-2024-08-06"),
            ExecutionMode::Action,
            &repo(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::MissingCredential(Provider::OpenAi)
        ));
    }

    #[tokio::test]
    async fn app_mode_reads_repository_variable() {
        let store = MapStore {
            values: HashMap::from([("OPENAI_API_KEY".to_string(), "sk-repo".to_string())]),
            reads: Mutex::new(vec![]),
        };
        let creds = CredentialResolver::resolve(
            Some("gpt-4o-2024-05-13"),
            ExecutionMode::App,
            &repo(),
            Some(&store),
        )
        .await
        .unwrap();
        assert_eq!(creds.secret(), "sk-repo");
        assert_eq!(*store.reads.lock().unwrap(), vec!["OPENAI_API_KEY"]);
    }

    #[tokio::test]
    async fn app_mode_empty_variable_is_missing() {
        let store = MapStore {
            values: HashMap::from([("ANTHROPIC_API_KEY".to_string(), "".to_string())]),
            reads: Mutex::new(vec![]),
        };
        let err = CredentialResolver::resolve(
            Some("claude-3-5-sonnet-20240620"),
            ExecutionMode::App,
            &repo(),
            Some(&store),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::MissingCredential(Provider::Anthropic)
        ));
        assert!(err.user_message().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn engine_env_blanks_other_providers() {
        let creds = Credentials::new(Provider::Anthropic, "sk-ant");
        assert_eq!(
            creds.engine_env(),
            vec![
                ("OPENAI_KEY", String::new()),
                ("ANTHROPIC_API_KEY", "sk-ant".to_string()),
            ]
        );
    }

    #[test]
    fn debug_output_redacts_secret() {
        let creds = Credentials::new(Provider::OpenAi, "sk-very-secret");
        assert!(!format!("{:?}", creds).contains("sk-very-secret"));
    }
}

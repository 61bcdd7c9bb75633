use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error category enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// The requested model's provider has no usable secret.
    MissingCredential,
    /// No model was requested at all.
    NoCredentialConfigured,
    /// The requested model cannot be mapped to any provider.
    UnknownModel,
    /// The engine never produced output (launch failure, missing image, crash before writing).
    SetupError,
    /// The engine ran but left neither a patch nor an explored-locations report.
    PatchGenError,
    /// No bot comment in the conversation carries a patch.
    NoPatchAvailable,
    /// A patch comment exists but its fenced diff block cannot be delimited.
    MalformedPatch,
    /// `git apply` rejected the diff.
    PatchApplyFailure,
    /// Push or pull-request creation failed.
    PublishTransportFailure,
    ValidationError,
    ToolExecutionError,
    IoError,
    SerializationError,
    InternalError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error severity enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Error,
    Warning,
    Info,
}

/// Where the target repository comes from and how the engine is reached.
///
/// `Action` is the single-tenant mode: a fixed, pre-checked-out repository on the
/// local machine and credentials from the process environment. `App` is the
/// multi-tenant mode: repositories are cloned per operation and credentials are
/// read from per-repository variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Action,
    App,
}

impl ExecutionMode {
    pub fn is_multi_tenant(self) -> bool {
        matches!(self, ExecutionMode::App)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Action => write!(f, "action"),
            ExecutionMode::App => write!(f, "app"),
        }
    }
}

/// Configured preference for execution mode resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModePreference {
    /// Multi-tenant when the engine image is locally available, otherwise single-tenant.
    #[default]
    Auto,
    Action,
    App,
}

impl FromStr for ModePreference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Ok(ModePreference::Auto),
            "action" => Ok(ModePreference::Action),
            "app" => Ok(ModePreference::App),
            _ => Err(format!(
                "invalid orchestrator mode '{}'; supported values are auto, action, app",
                value
            )),
        }
    }
}

impl fmt::Display for ModePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModePreference::Auto => write!(f, "auto"),
            ModePreference::Action => write!(f, "action"),
            ModePreference::App => write!(f, "app"),
        }
    }
}

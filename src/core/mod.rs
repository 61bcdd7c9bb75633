pub mod backend;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod git;
pub mod github;
pub mod models;
pub mod orchestrator;
pub mod publisher;
pub mod request;
pub mod results_processor;
pub mod task_identity;
pub mod types;

pub use config::{ConfigLoader, ConfigValidator, PatchwrightConfig};
pub use error::{AppError, DefaultErrorReporter, ErrorReporter};
pub use orchestrator::{PatchOrchestrator, PipelinePhase, PipelineReport};
pub use publisher::GitPublisher;
pub use request::{InvocationRequest, RepositoryRef};
pub use results_processor::{OutputFormat, ResultExtractor, RunResult};
pub use task_identity::TaskId;
pub use types::*;

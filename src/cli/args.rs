use crate::core::results_processor::OutputFormat;
use crate::core::types::ModePreference;
use clap::Args;
use std::path::PathBuf;

/// Repository and issue shared by every command.
#[derive(Args, Clone, Debug)]
pub struct IssueArgs {
    /// Repository as owner/name
    #[arg(long, value_name = "OWNER/NAME")]
    pub repo: String,

    /// Issue number within the repository
    #[arg(long, value_name = "NUMBER")]
    pub issue: u64,
}

impl IssueArgs {
    pub fn default_issue_url(&self) -> String {
        format!("https://github.com/{}/issues/{}", self.repo.trim_matches('/'), self.issue)
    }

    pub fn default_clone_url(&self) -> String {
        format!("https://github.com/{}.git", self.repo.trim_matches('/'))
    }
}

#[derive(Args)]
pub struct SolveArgs {
    #[command(flatten)]
    pub target: IssueArgs,

    /// Issue title handed to the engine
    #[arg(long, value_name = "TEXT")]
    pub title: Option<String>,

    /// Issue body handed to the engine
    #[arg(long, value_name = "TEXT", conflicts_with = "body_file")]
    pub body: Option<String>,

    /// Read the issue body from a file instead of --body
    #[arg(long, value_name = "FILE")]
    pub body_file: Option<PathBuf>,

    /// Web URL of the issue (default: https://github.com/OWNER/NAME/issues/NUMBER)
    #[arg(long, value_name = "URL")]
    pub issue_url: Option<String>,

    /// Clone URL of the repository (default: https://github.com/OWNER/NAME.git)
    #[arg(long, value_name = "URL")]
    pub clone_url: Option<String>,

    /// Model to run; falls back to orchestrator.default_model
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Override orchestrator.mode (auto, action, app)
    #[arg(long, value_name = "MODE")]
    pub mode: Option<ModePreference>,

    /// Post the rendered result as an issue comment
    #[arg(long, help_heading = "Output Options")]
    pub post_comment: bool,

    /// Emit either terminal-friendly text or machine-readable JSON
    #[arg(long, default_value = "text", value_name = "FORMAT", help_heading = "Output Options")]
    pub format: ReportFormat,
}

#[derive(Args)]
pub struct PublishArgs {
    #[command(flatten)]
    pub target: IssueArgs,

    /// Issue title used in the pull request title
    #[arg(long, value_name = "TEXT")]
    pub title: Option<String>,

    /// Clone URL used when publishing from a fresh clone
    #[arg(long, value_name = "URL")]
    pub clone_url: Option<String>,

    /// Override orchestrator.mode (auto, action, app)
    #[arg(long, value_name = "MODE")]
    pub mode: Option<ModePreference>,

    /// Reply on the issue with the pull request link or the reason nothing was published
    #[arg(long)]
    pub post_comment: bool,
}

#[derive(Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub target: IssueArgs,

    /// Output root holding one directory per task (default: engine.output_root)
    #[arg(long, value_name = "PATH")]
    pub output_root: Option<PathBuf>,

    /// Model label recorded in the result
    #[arg(long, value_name = "MODEL", default_value = "")]
    pub model: String,

    /// Print the issue comment that would be posted instead of the report
    #[arg(long, conflicts_with = "format")]
    pub as_comment: bool,

    /// Emit either terminal-friendly text or machine-readable JSON
    #[arg(long, default_value = "text", value_name = "FORMAT")]
    pub format: ReportFormat,
}

#[derive(Args)]
pub struct TaskIdArgs {
    #[command(flatten)]
    pub target: IssueArgs,
}

#[derive(Clone, Copy, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    /// Human-readable summary followed by the comment body
    Text,
    /// JSON payload suitable for downstream tooling
    Json,
}

impl From<ReportFormat> for OutputFormat {
    fn from(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Text => OutputFormat::Text,
            ReportFormat::Json => OutputFormat::Json,
        }
    }
}

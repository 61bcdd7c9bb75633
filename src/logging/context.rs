use crate::cli::args::ReportFormat;
use crate::cli::{Args, Command};
use std::env;

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Interactive use from a terminal.
    LocalDev,
    /// Inside a GitHub Actions job, where the job log captures stdout.
    CiRunner,
    /// The command prints a payload on stdout that callers capture.
    Scripted,
    /// Long-lived host process (webhook receiver) that ships logs elsewhere.
    Service,
}

impl ExecutionContext {
    /// Returns `true` when stdout is reserved for command output.
    pub fn reserves_stdout(self) -> bool {
        matches!(self, ExecutionContext::Scripted)
    }
}

/// Derive the active execution context from the parsed CLI plus environment.
pub fn detect_context(args: &Args) -> ExecutionContext {
    if service_override_enabled() {
        return ExecutionContext::Service;
    }

    let scripted = match &args.command {
        Command::Solve(solve) => solve.format == ReportFormat::Json,
        Command::Extract(_) | Command::TaskId(_) => true,
        Command::Publish(_) => false,
    };
    if scripted {
        return ExecutionContext::Scripted;
    }

    if running_in_actions() {
        ExecutionContext::CiRunner
    } else {
        ExecutionContext::LocalDev
    }
}

fn running_in_actions() -> bool {
    env::var("GITHUB_ACTIONS")
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn service_override_enabled() -> bool {
    env::var("PATCHWRIGHT_SERVICE")
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}

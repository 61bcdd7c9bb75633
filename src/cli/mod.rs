pub mod args;
pub mod commands;

pub use args::{ExtractArgs, IssueArgs, PublishArgs, ReportFormat, SolveArgs, TaskIdArgs};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "patchwright")]
#[command(version = crate::VERSION)]
#[command(about = "Turn issue reports into reviewable patches and pull requests")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: solve an issue (optionally posting the result), then publish the last posted patch as a pull request."
)]
pub struct Args {
    /// Workspace holding patchwright.toml and .patchwright/ (default: current directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub workspace: Option<PathBuf>,

    /// Path to config file (default: {workspace}/patchwright.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Run the analysis engine for one issue",
        long_about = "Solve resolves the execution mode and the model credential, runs the engine, and extracts a patch or the explored locations from its output.",
        after_help = "Example:\n    patchwright solve --repo octo/demo --issue 3 --body \"fix null pointer\""
    )]
    Solve(SolveArgs),
    #[command(
        about = "Open a pull request from the last patch posted on an issue",
        long_about = "Publish reads the issue conversation, takes the most recent patch comment, applies it on a fresh branch, pushes it and opens a pull request.",
        after_help = "Example:\n    patchwright publish --repo octo/demo --issue 3 --post-comment"
    )]
    Publish(PublishArgs),
    #[command(
        about = "Re-read engine output already on disk",
        long_about = "Extract runs result extraction over an existing output root without launching the engine.",
        after_help = "Example:\n    patchwright extract --repo octo/demo --issue 3 --format json"
    )]
    Extract(ExtractArgs),
    #[command(
        about = "Print the task identity of an issue",
        after_help = "Example:\n    patchwright task-id --repo octo/demo --issue 3"
    )]
    TaskId(TaskIdArgs),
}

pub async fn run(args: Args) -> crate::Result<()> {
    let Args {
        workspace,
        config,
        command,
    } = args;
    match command {
        Command::TaskId(task_args) => commands::task_id(task_args),
        Command::Solve(solve_args) => {
            let ctx = commands::AppContext::load(workspace, config)?;
            commands::solve(&ctx, solve_args).await
        }
        Command::Publish(publish_args) => {
            let ctx = commands::AppContext::load(workspace, config)?;
            commands::publish(&ctx, publish_args).await
        }
        Command::Extract(extract_args) => {
            let ctx = commands::AppContext::load(workspace, config)?;
            commands::extract(&ctx, extract_args)
        }
    }
}

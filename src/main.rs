use clap::Parser;
use patchwright::cli::{self, Args};
use patchwright::logging;

#[tokio::main]
async fn main() -> patchwright::Result<()> {
    let args = Args::parse();
    let _logging = logging::init(&args)?;
    cli::run(args).await
}

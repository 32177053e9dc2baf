mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{run::RunArgs, runs::RunsArgs, validate::ValidateArgs, GlobalArgs};

/// Run, validate and inspect CI/CD pipelines locally
#[derive(Parser, Debug)]
#[command(name = "pipeline", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a pipeline definition and stream its progress
    Run(RunArgs),
    /// Check a pipeline definition without running it
    Validate(ValidateArgs),
    /// Inspect recorded runs
    Runs(RunsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_service=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, &cli.global).await,
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Runs(args) => commands::runs::execute(args, &cli.global).await,
    }
}

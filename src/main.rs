mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run()?,
        Commands::Check => commands::check::run().await?,
        Commands::Reconciler => commands::reconciler::run().await?,
        Commands::BuildWorker => commands::build_worker::run().await?,
        Commands::WebhookDispatcher => commands::webhook_dispatcher::run().await?,
    }

    Ok(())
}

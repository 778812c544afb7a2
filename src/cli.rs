use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "orbitctl")]
#[command(about = "PaaS deployment orchestration control plane")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check that the process can start cleanly in this environment
    Check,

    /// Run the Service Reconciler process role
    Reconciler,

    /// Run the Build Executor process role
    BuildWorker,

    /// Run the Event Bus + Webhook Dispatcher process role
    WebhookDispatcher,
}

//! OrgClaw CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write the default config and data directories
//! - `provision`: Create a user instance and bind a channel identity to it
//! - `consent`: Grant, withdraw or list consent for an instance
//! - `chat`: Talk to your assistant over the terminal channel
//! - `sessions`: List, close, compact or expire sessions

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "orgclaw",
    about = "OrgClaw — multi-tenant conversation orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config, skills file and context directory
    Init,

    /// Create an active user instance with a channel binding
    Provision(commands::provision::ProvisionArgs),

    /// Manage consent records
    Consent {
        #[command(subcommand)]
        action: commands::consent::ConsentAction,
    },

    /// Chat through the terminal channel
    Chat(commands::chat::ChatArgs),

    /// Session administration
    Sessions {
        #[command(subcommand)]
        action: commands::sessions::SessionAction,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Provision(args) => commands::provision::run(args).await?,
        Commands::Consent { action } => commands::consent::run(action).await?,
        Commands::Chat(args) => commands::chat::run(args).await?,
        Commands::Sessions { action } => commands::sessions::run(action).await?,
    }

    Ok(())
}

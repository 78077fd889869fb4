//! contextloop CLI: the main entry point.
//!
//! Commands:
//! - `agent`   Interactive chat or single-message mode
//! - `models`  List configured model profiles
//! - `onboard` Initialize config and workspace
//! - `status`  Show the active configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "contextloop",
    about = "contextloop: a tool-calling agent that manages its own context window",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue a conversation saved with --save
        #[arg(long, value_name = "FILE")]
        resume: Option<PathBuf>,

        /// Write the conversation to FILE when the session ends
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
    },

    /// List configured model profiles
    Models,

    /// Initialize configuration and workspace
    Onboard,

    /// Show the active configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Agent {
            message,
            resume,
            save,
        } => commands::agent::run(message, resume, save).await?,
        Commands::Models => commands::models::run()?,
        Commands::Onboard => commands::onboard::run()?,
        Commands::Status => commands::status::run()?,
    }

    Ok(())
}

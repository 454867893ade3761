//! dirsync CLI - synchronize an LDAP directory into TestOps
//!
//! Subcommands:
//! - `sync`: converge TestOps users, groups and memberships to the directory
//! - `plan`: compute and print the change plan without applying it

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

/// Synchronize LDAP directory users and groups into TestOps.
#[derive(Parser)]
#[command(name = "dirsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Converge TestOps to the directory state
    Sync(commands::sync::SyncArgs),

    /// Compute the change plan without applying it
    Plan(commands::plan::PlanArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Sync(args) => commands::sync::execute(args).await,
        Commands::Plan(args) => commands::plan::execute(args).await,
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

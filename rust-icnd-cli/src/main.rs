use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod utils;

/// icnd command line interface
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ICN forwarder
    Forwarder {
        /// Path to a configuration file (TOML, JSON or YAML)
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Address to listen on, overriding the configuration
        #[clap(short, long)]
        listen: Option<String>,

        /// Enable the autoconfig server stage
        #[clap(short, long)]
        autoconfig: bool,
    },

    /// Run an autoconfiguring repository
    Repo {
        /// Path to a configuration file (TOML, JSON or YAML)
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Repository name, overriding the configuration
        #[clap(short, long)]
        name: Option<String>,

        /// Broadcast address forwarder solicitations go to
        #[clap(short, long)]
        broadcast: Option<String>,

        /// Objects to serve, as name=value pairs relative to the
        /// registered prefix
        #[clap(short, long)]
        object: Vec<String>,
    },

    /// Send a single Interest and print the reply
    Interest {
        /// Name to request
        name: String,

        /// Forwarder to send to, as host:port
        #[clap(short, long, default_value = "127.0.0.1:9000")]
        target: String,

        /// Timeout in milliseconds
        #[clap(long, default_value = "4000")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    // Execute the specified command
    match cli.command {
        Commands::Forwarder {
            config,
            listen,
            autoconfig,
        } => {
            commands::forwarder::run(config, listen, autoconfig).await?;
        }
        Commands::Repo {
            config,
            name,
            broadcast,
            object,
        } => {
            commands::repo::run(config, name, broadcast, object).await?;
        }
        Commands::Interest {
            name,
            target,
            timeout,
        } => {
            commands::interest::send_interest(name, target, timeout).await?;
        }
    }

    Ok(())
}

//! provd CLI
//!
//! Runs and inspects the provd device-settings broker.
//!
//! # Commands
//!
//! - `serve` - Run a broker, speaking JSON lines on stdin and stdout
//! - `adapters` - List the adapters an instance hosts
//! - `version` - Show version information

mod commands;
mod registry;

use clap::{Parser, Subcommand};
use provd_server::{Instance, ServerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// provd device-settings broker.
#[derive(Parser)]
#[command(name = "provd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Adapter subset to host (system, session)
    #[arg(global = true, short, long, default_value = "session")]
    instance: Instance,

    /// Directory for map files and local stores
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a broker over stdin and stdout
    Serve {
        /// Seconds to stay up without a session
        #[arg(short = 't', long, default_value = "30")]
        idle_timeout: u64,

        /// Name the interface layer registers under
        #[arg(short, long)]
        bus_name: Option<String>,

        /// IMSI of a simulated modem (repeatable, system instance only)
        #[arg(long)]
        imsi: Vec<String>,
    },

    /// List the adapters hosted by the instance
    Adapters,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // stdout carries replies, so logs go to stderr
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ServerConfig::new(cli.instance);
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    match cli.command {
        Commands::Serve {
            idle_timeout,
            bus_name,
            imsi,
        } => {
            config = config.with_idle_timeout(Duration::from_secs(idle_timeout));
            if let Some(name) = bus_name {
                config = config.with_bus_name(name);
            }
            let registry = registry::build(&config, &imsi);
            commands::serve::run(config, registry).await?;
        }
        Commands::Adapters => {
            let registry = registry::build(&config, &[]);
            commands::adapters::run(&config, &registry);
        }
        Commands::Version => {
            println!("provd v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

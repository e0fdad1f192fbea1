mod ports;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "routekit")]
#[command(version, about = "routekit - file-system routed web server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a project directory (its src/ subdirectory when present)
    Serve {
        /// Project directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Production mode: no hot reload, any file change exits
        #[arg(long)]
        production: bool,

        /// Port to listen on (overrides routekit.toml and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { path, production, port } => {
            serve::execute(&path, production, port)?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `VERBOSE` raises the default level to debug
fn init_tracing() {
    let default_level = if std::env::var_os("VERBOSE").is_some() {
        "routekit=debug,info"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

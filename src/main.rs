use anyhow::Result;
use clap::{Parser, Subcommand};
use kinfeed::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kinfeed")]
#[command(about = "Family-scoped social feed backend", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config file (defaults to built-in settings)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            kinfeed::gateway::run_gateway(config, &host, port).await?;
        }
    }

    Ok(())
}

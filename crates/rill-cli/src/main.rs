//! Rill CLI - reactive notebook server.

mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rill")]
#[command(about = "Reactive notebook server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the notebook server
    Serve {
        /// Directory holding the notebook JSON files
        #[arg(long, default_value = "./notebooks")]
        data_dir: String,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else {
        "info,sqlx=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            data_dir,
            host,
            port,
        } => serve::execute(&data_dir, host, port).await,
    }
}

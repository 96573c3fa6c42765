//! Chat Relay - Server
//!
//! Authenticated WebSocket message relay with an embedded SQLite store.

use anyhow::Result;
use chat_relay::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "Authenticated real-time message relay server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to listen on (overrides config.yaml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Path to the SQLite database (overrides config.yaml)
        #[arg(long)]
        database: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chat_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Serve { port, database } => {
            if let Some(port) = port {
                config.server_port = port;
            }
            if let Some(database) = database {
                config.database_path = database;
            }
            chat_relay::start_server(config).await
        }
    }
}

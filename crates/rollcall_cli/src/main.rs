//! Rollcall CLI
//!
//! Runs a rollcall server or client, and manages the shared key.
//!
//! # Commands
//!
//! - `keygen` - Write a new shared key file
//! - `serve` - Run the server with an interactive operator menu
//! - `client` - Run a client that applies pushed personnel updates

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Push personnel records from a server to connected clients.
#[derive(Parser)]
#[command(name = "rollcall")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new 32-byte shared key
    Keygen {
        /// Where to write the key
        #[arg(short, long)]
        out: PathBuf,

        /// Derive the key from a passphrase instead of generating one
        #[arg(long)]
        passphrase: Option<String>,

        /// Salt for passphrase derivation
        #[arg(long, default_value = "rollcall")]
        salt: String,
    },

    /// Run the server
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "ROLLCALL_BIND", default_value = "127.0.0.1:7878")]
        bind: SocketAddr,

        /// Shared key file
        #[arg(short, long, env = "ROLLCALL_KEY_FILE")]
        key_file: PathBuf,

        /// JSON file with the initial personnel list
        #[arg(short, long)]
        personnel: Option<PathBuf>,

        /// Maximum concurrent clients
        #[arg(long, default_value = "1000")]
        max_connections: usize,

        /// Per-client write timeout in milliseconds
        #[arg(long, default_value = "5000")]
        write_timeout_ms: u64,
    },

    /// Run a client
    Client {
        /// Server address
        #[arg(short, long, env = "ROLLCALL_SERVER", default_value = "127.0.0.1:7878")]
        server: SocketAddr,

        /// Shared key file
        #[arg(short, long, env = "ROLLCALL_KEY_FILE")]
        key_file: PathBuf,

        /// Keep personnel in this JSON file instead of in memory
        #[arg(short, long, env = "ROLLCALL_DATA")]
        data: Option<PathBuf>,

        /// Reconnect after the server goes away
        #[arg(short, long)]
        reconnect: bool,

        /// Connection attempts before giving up
        #[arg(long, default_value = "5")]
        max_attempts: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Keygen {
            out,
            passphrase,
            salt,
        } => {
            commands::keygen::run(&out, passphrase.as_deref(), &salt)?;
        }
        Commands::Serve {
            bind,
            key_file,
            personnel,
            max_connections,
            write_timeout_ms,
        } => {
            let options = commands::serve::ServeOptions {
                bind,
                key_file,
                personnel,
                max_connections,
                write_timeout: std::time::Duration::from_millis(write_timeout_ms),
            };
            commands::serve::run(options).await?;
        }
        Commands::Client {
            server,
            key_file,
            data,
            reconnect,
            max_attempts,
        } => {
            let options = commands::client::ClientOptions {
                server,
                key_file,
                data,
                reconnect,
                max_attempts,
            };
            commands::client::run(options).await?;
        }
    }

    Ok(())
}

//! Client command implementation.

use rollcall_client::{ClientAgent, ClientConfig, RetryConfig, SessionStats};
use rollcall_protocol::SharedKey;
use rollcall_store::{FileStore, MemoryStore, PersonnelRepository};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Options for the client command.
#[derive(Debug)]
pub struct ClientOptions {
    /// Server address.
    pub server: SocketAddr,
    /// Shared key file.
    pub key_file: PathBuf,
    /// Personnel snapshot file; in memory when absent.
    pub data: Option<PathBuf>,
    /// Reconnect after disconnection.
    pub reconnect: bool,
    /// Connection attempts per session.
    pub max_attempts: u32,
}

/// Runs the client command.
pub async fn run(options: ClientOptions) -> Result<(), Box<dyn std::error::Error>> {
    let key = SharedKey::load(&options.key_file)
        .map_err(|e| format!("cannot read key file {}: {}", options.key_file.display(), e))?;

    let store: Arc<dyn PersonnelRepository> = match &options.data {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    info!(
        "local repository holds {} personnel records",
        store.list_all_personnel()?.len()
    );

    let config = ClientConfig::new(options.server)
        .with_retry(RetryConfig::new(options.max_attempts.max(1)));

    loop {
        let agent = tokio::select! {
            agent = ClientAgent::connect_with_retry(&config, &key, Arc::clone(&store)) => agent?,
            _ = tokio::signal::ctrl_c() => break,
        };
        println!("Connected to {}", options.server);

        let stats = tokio::select! {
            stats = agent.run() => stats,
            _ = tokio::signal::ctrl_c() => break,
        };
        print_stats(&stats);

        if !options.reconnect {
            break;
        }
        println!("Disconnected; reconnecting");
    }

    println!("Client holds {} personnel records", store.list_all_personnel()?.len());
    Ok(())
}

fn print_stats(stats: &SessionStats) {
    println!(
        "Session ended: {} frames, {} applied ({} saved, {} deleted), {} undecodable, {} unknown actions, {} failed",
        stats.frames_received,
        stats.applied,
        stats.changes.saved,
        stats.changes.deleted,
        stats.decode_failures,
        stats.unknown_actions,
        stats.apply_failures
    );
}

//! Serve command implementation.

use super::menu::{self, Task};
use rollcall_protocol::{PersonnelRecord, SharedKey};
use rollcall_server::{Registry, Repositories, Server, ServerConfig};
use rollcall_store::MemoryStore;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Options for the serve command.
#[derive(Debug)]
pub struct ServeOptions {
    /// Listen address.
    pub bind: SocketAddr,
    /// Shared key file.
    pub key_file: PathBuf,
    /// Initial personnel list.
    pub personnel: Option<PathBuf>,
    /// Maximum concurrent clients.
    pub max_connections: usize,
    /// Per-client write timeout.
    pub write_timeout: Duration,
}

/// Reads a JSON array of personnel records.
pub fn load_personnel(path: &Path) -> Result<Vec<PersonnelRecord>, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let records: Vec<PersonnelRecord> = serde_json::from_slice(&bytes)
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(records)
}

/// Runs the serve command.
pub async fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let key = SharedKey::load(&options.key_file)
        .map_err(|e| format!("cannot read key file {}: {}", options.key_file.display(), e))?;

    let seed = match &options.personnel {
        Some(path) => load_personnel(path)?,
        None => Vec::new(),
    };
    let store = Arc::new(MemoryStore::with_personnel(seed));
    info!("loaded {} personnel records", store.personnel_count());

    let config = ServerConfig::new(options.bind)
        .with_max_connections(options.max_connections)
        .with_write_timeout(options.write_timeout);
    let server = Server::bind(config, &key, Repositories::in_memory(store)).await?;
    println!("Server listening on {}", server.local_addr());

    let registry = server.registry();
    let dispatcher = server.dispatcher();
    let shutdown = server.shutdown_handle();
    let server_task = tokio::spawn(server.run());

    println!("{}", menu::MENU);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let task = match menu::parse(&line) {
            Ok(task) => task,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        match task {
            Task::Exit => break,
            Task::Help => println!("{}", menu::MENU),
            Task::List => print_clients(&registry),
            task => match menu::execute(&dispatcher, &task).await {
                Some(Ok(report)) => println!("{}", menu::describe(&report)),
                Some(Err(e)) => println!("error: {e}"),
                None => {}
            },
        }
    }

    println!("Server shutting down");
    shutdown.shutdown();
    match server_task.await {
        Ok(result) => result?,
        Err(e) => warn!("server task failed: {}", e),
    }
    Ok(())
}

fn print_clients(registry: &Registry) {
    let clients = registry.list_all();
    if clients.is_empty() {
        println!("No clients connected");
        return;
    }
    for client in clients {
        println!("  {client}");
    }
}

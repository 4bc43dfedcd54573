//! Accept loop.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::ServerResult;
use crate::registry::Registry;
use rollcall_protocol::{Codec, SharedKey};
use rollcall_store::{ClientRepository, DeliveryLog, MemoryStore, PersonnelRepository};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

/// Storage collaborators the server runs against.
#[derive(Clone)]
pub struct Repositories {
    /// Personnel the operator can send.
    pub personnel: Arc<dyn PersonnelRepository>,
    /// Mirror of the registry.
    pub clients: Arc<dyn ClientRepository>,
    /// Optional audit trail of deliveries.
    pub deliveries: Option<Arc<dyn DeliveryLog>>,
}

impl Repositories {
    /// Uses one in-memory store for everything.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            personnel: store.clone(),
            clients: store.clone(),
            deliveries: Some(store),
        }
    }
}

/// Tells a running server to stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Requests shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// The rollcall server.
///
/// # Example
///
/// ```no_run
/// use rollcall_protocol::SharedKey;
/// use rollcall_server::{Repositories, Server, ServerConfig};
/// use rollcall_store::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn demo() -> rollcall_server::ServerResult<()> {
/// let key = SharedKey::generate();
/// let store = Arc::new(MemoryStore::new());
/// let server = Server::bind(ServerConfig::default(), &key, Repositories::in_memory(store)).await?;
///
/// let dispatcher = server.dispatcher();
/// tokio::spawn(server.run());
/// dispatcher.delete_all_from_all().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        config: ServerConfig,
        key: &SharedKey,
        repositories: Repositories,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(Registry::new(repositories.clients));
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            repositories.personnel,
            Codec::new(key),
            config.write_timeout,
        )
        .with_max_frame_size(config.max_frame_size);
        if let Some(log) = repositories.deliveries {
            dispatcher = dispatcher.with_audit(log);
        }

        let (tx, _) = watch::channel(false);
        info!("listening on {}", local_addr);
        Ok(Self {
            config,
            listener,
            local_addr,
            registry,
            dispatcher,
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        })
    }

    /// The address actually bound, useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The registry of connected clients.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// A dispatcher bound to this server's registry.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// A handle that stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accepts connections until shutdown is requested.
    ///
    /// Each accepted socket gets its own task. On shutdown every
    /// connection task unregisters and closes before this returns.
    pub async fn run(self) -> ServerResult<()> {
        let mut shutdown = self.shutdown.tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };

                    if connections.len() >= self.config.max_connections {
                        warn!("refusing {}: {} connections open", addr, connections.len());
                        drop(stream);
                        continue;
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay on {} failed: {}", addr, e);
                    }

                    let connection = Connection::from_tcp(stream, addr);
                    let span = info_span!("connection", peer = %addr, id = connection.id());
                    connections.spawn(
                        connection
                            .run(Arc::clone(&self.registry), self.shutdown.tx.subscribe())
                            .instrument(span),
                    );
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!("connection task failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("shutting down; closing {} connections", connections.len());
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                warn!("connection task failed: {}", e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout, Instant};

    async fn until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            sleep(Duration::from_millis(10)).await;
        }
    }

    type Started = (
        SocketAddr,
        Arc<Registry>,
        ShutdownHandle,
        tokio::task::JoinHandle<ServerResult<()>>,
    );

    async fn start(config: ServerConfig) -> Started {
        let store = Arc::new(MemoryStore::new());
        let server = Server::bind(config, &SharedKey::generate(), Repositories::in_memory(store))
            .await
            .unwrap();
        let addr = server.local_addr();
        let registry = server.registry();
        let shutdown = server.shutdown_handle();
        (addr, registry, shutdown, tokio::spawn(server.run()))
    }

    fn local() -> ServerConfig {
        ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    #[tokio::test]
    async fn registers_and_reaps_clients() {
        let (addr, registry, shutdown, task) = start(local()).await;

        let a = TcpStream::connect(addr).await.unwrap();
        let b = TcpStream::connect(addr).await.unwrap();
        until(|| registry.len() == 2).await;

        let names: Vec<_> = registry.list_all().into_iter().map(|c| c.display_name).collect();
        assert_eq!(names, ["Client1", "Client2"]);

        drop(a);
        until(|| registry.len() == 1).await;
        assert_eq!(registry.list_all()[0].port, b.local_addr().unwrap().port());

        shutdown.shutdown();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn excess_connections_are_refused() {
        let (addr, registry, shutdown, task) = start(local().with_max_connections(1)).await;

        let _a = TcpStream::connect(addr).await.unwrap();
        until(|| registry.len() == 1).await;

        let mut b = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), tokio::io::AsyncReadExt::read(&mut b, &mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(registry.len(), 1);

        shutdown.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_before_any_client() {
        let (_addr, _registry, shutdown, task) = start(local()).await;
        shutdown.shutdown();
        assert!(shutdown.is_shutdown());
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    }
}

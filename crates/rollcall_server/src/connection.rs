//! Per-socket lifecycle task.

use crate::error::ServerResult;
use crate::registry::{ConnectionLink, Registry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle of one accepted connection.
///
/// ```text
/// Accepted ──register──► Registered ──EOF / read error / abort / shutdown──► AwaitingClose ──► Closed
/// ```
///
/// Only a `Registered` connection is a valid dispatch recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Socket accepted, no registry entry yet.
    Accepted,
    /// Present in the registry.
    Registered,
    /// Peer gone; unregistering.
    AwaitingClose,
    /// Registry entry removed and socket released.
    Closed,
}

/// Owns one client socket from accept to close.
///
/// The server never expects application data from a client, so the read
/// half exists only to detect disconnection. Anything the peer sends is
/// discarded.
pub struct Connection<R> {
    addr: SocketAddr,
    reader: R,
    link: Arc<ConnectionLink>,
    state: watch::Sender<ConnectionState>,
}

impl Connection<OwnedReadHalf> {
    /// Wraps an accepted TCP stream.
    pub fn from_tcp(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(addr, reader, writer)
    }
}

impl<R> Connection<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Creates a connection in the `Accepted` state.
    pub fn new<W>(addr: SocketAddr, reader: R, writer: W) -> Self
    where
        W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let (state, _) = watch::channel(ConnectionState::Accepted);
        Self {
            addr,
            reader,
            link: ConnectionLink::new(addr, writer),
            state,
        }
    }

    /// Connection id, unique within the process.
    pub fn id(&self) -> u64 {
        self.link.id()
    }

    /// Peer address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ConnectionState) {
        debug!("{:?} -> {:?}", self.state(), next);
        self.state.send_replace(next);
    }

    /// Registers with `registry`, then waits for the peer to go away.
    ///
    /// Returns once the connection is `Closed`. The registry entry is
    /// removed on every exit path, unless a newer connection from the same
    /// address has since taken it over.
    ///
    /// # Errors
    ///
    /// Returns an error only if registration fails; the socket is closed
    /// in that case too.
    pub async fn run(
        mut self,
        registry: Arc<Registry>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ServerResult<()> {
        let record = match registry.register(self.link.handle()) {
            Ok(record) => record,
            Err(e) => {
                warn!("registration failed: {}", e);
                self.transition(ConnectionState::Closed);
                return Err(e);
            }
        };
        self.transition(ConnectionState::Registered);

        let reason = if *shutdown.borrow() {
            "server shutting down"
        } else {
            self.await_disconnect(&mut shutdown).await
        };
        info!("{} disconnecting: {}", record, reason);

        self.transition(ConnectionState::AwaitingClose);
        registry.unregister_connection(self.addr, self.link.id());

        let Connection {
            reader, link, state, ..
        } = self;
        drop(reader);
        drop(link);
        state.send_replace(ConnectionState::Closed);
        Ok(())
    }

    async fn await_disconnect(&mut self, shutdown: &mut watch::Receiver<bool>) -> &'static str {
        let mut buf = [0u8; 512];
        loop {
            tokio::select! {
                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => return "end of stream",
                    Ok(n) => debug!("discarding {} unsolicited bytes", n),
                    Err(e) => {
                        debug!("read error: {}", e);
                        return "read error";
                    }
                },
                () = self.link.aborted() => return "aborted after failed write",
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return "server shutting down";
                    }
                }
            }
        }
    }
}

impl<R> std::fmt::Debug for Connection<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("id", &self.link.id())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

//! The client agent: connect, receive, apply.

use crate::applier::{Applier, ApplyOutcome};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use rollcall_protocol::{read_frame, Codec, Envelope, ProtocolError, SharedKey};
use rollcall_store::PersonnelRepository;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// Agent state.
///
/// ```text
/// Disconnected ──connect──► Connected ──run──► Receiving ──closure──► Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    /// No connection. Initial and terminal.
    Disconnected,
    /// TCP handshake complete.
    Connected,
    /// Reading and applying frames.
    Receiving,
}

/// Counters for one session, returned when the connection closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames read off the socket.
    pub frames_received: u64,
    /// Envelopes applied to the local repository.
    pub applied: u64,
    /// Frames that failed to decrypt or parse.
    pub decode_failures: u64,
    /// Authentic envelopes with an action this client does not know.
    pub unknown_actions: u64,
    /// Envelopes the repository rejected, fully or partly.
    pub apply_failures: u64,
    /// Net local changes.
    pub changes: ApplyOutcome,
}

/// Receives pushed envelopes from one server connection and applies them.
///
/// Decode failures and unknown actions are logged and skipped; the loop
/// only ends when the server closes the connection or the socket fails.
///
/// # Example
///
/// ```no_run
/// use rollcall_client::{ClientAgent, ClientConfig};
/// use rollcall_protocol::SharedKey;
/// use rollcall_store::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn demo(key: SharedKey) -> rollcall_client::ClientResult<()> {
/// let store = Arc::new(MemoryStore::new());
/// let agent = ClientAgent::connect(&ClientConfig::default(), &key, store).await?;
/// let stats = agent.run().await;
/// println!("applied {} envelopes", stats.applied);
/// # Ok(())
/// # }
/// ```
pub struct ClientAgent<S = TcpStream> {
    stream: S,
    server: String,
    codec: Codec,
    applier: Applier,
    max_frame_size: usize,
    state: watch::Sender<AgentState>,
}

impl ClientAgent<TcpStream> {
    /// Connects to the configured server.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectTimeout`] if the handshake does not complete
    /// within `config.connect_timeout`, or the socket error.
    pub async fn connect(
        config: &ClientConfig,
        key: &SharedKey,
        store: Arc<dyn PersonnelRepository>,
    ) -> ClientResult<Self> {
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(config.server_addr),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout(config.connect_timeout))??;
        stream.set_nodelay(true)?;

        info!(
            "connected to {} from {}",
            config.server_addr,
            stream.local_addr()?
        );
        Ok(Self::from_stream(
            stream,
            config.server_addr.to_string(),
            config,
            key,
            store,
        ))
    }

    /// Connects, retrying per `config.retry`.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or immediately
    /// for errors that retrying cannot fix.
    pub async fn connect_with_retry(
        config: &ClientConfig,
        key: &SharedKey,
        store: Arc<dyn PersonnelRepository>,
    ) -> ClientResult<Self> {
        let mut attempt = 0;
        loop {
            tokio::time::sleep(config.retry.delay_for_attempt(attempt)).await;
            attempt += 1;

            match Self::connect(config, key, Arc::clone(&store)).await {
                Ok(agent) => return Ok(agent),
                Err(e) if e.is_retryable() && config.retry.allows(attempt) => {
                    warn!(
                        "connect attempt {}/{} failed: {}",
                        attempt, config.retry.max_attempts, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Local address of the socket, as the server sees it.
    pub fn local_addr(&self) -> ClientResult<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }
}

impl<S> ClientAgent<S>
where
    S: AsyncRead + Send + Unpin,
{
    /// Wraps an already connected stream.
    pub fn from_stream(
        stream: S,
        server: impl Into<String>,
        config: &ClientConfig,
        key: &SharedKey,
        store: Arc<dyn PersonnelRepository>,
    ) -> Self {
        let (state, _) = watch::channel(AgentState::Connected);
        Self {
            stream,
            server: server.into(),
            codec: Codec::new(key),
            applier: Applier::new(store),
            max_frame_size: config.max_frame_size,
            state,
        }
    }

    /// Current state.
    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Receives until the connection closes.
    pub async fn run(mut self) -> SessionStats {
        let span = info_span!("agent", server = %self.server);
        async move {
            self.state.send_replace(AgentState::Receiving);
            let stats = self.receive().await;
            self.state.send_replace(AgentState::Disconnected);
            info!(
                "disconnected after {} frames ({} applied, {} undecodable, {} unknown, {} failed)",
                stats.frames_received,
                stats.applied,
                stats.decode_failures,
                stats.unknown_actions,
                stats.apply_failures
            );
            stats
        }
        .instrument(span)
        .await
    }

    async fn receive(&mut self) -> SessionStats {
        let mut stats = SessionStats::default();
        loop {
            let frame = match read_frame(&mut self.stream, self.max_frame_size).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("server closed the connection");
                    break;
                }
                // After a bad length prefix there is no way to find the
                // next frame.
                Err(e) => {
                    warn!("read failed, closing: {}", e);
                    break;
                }
            };
            stats.frames_received += 1;

            match self.codec.open(&frame) {
                Ok(envelope) => apply(self.applier.clone(), envelope, &mut stats).await,
                Err(e) if e.is_recoverable() => skip(&e, frame.len(), &mut stats),
                Err(e) => {
                    warn!("codec failed, closing: {}", e);
                    break;
                }
            }
        }
        stats
    }
}

/// Counts a frame that could not be turned into an envelope.
fn skip(error: &ProtocolError, len: usize, stats: &mut SessionStats) {
    match error {
        ProtocolError::UnknownAction(action) => {
            warn!("ignoring envelope with unknown action {:?}", action);
            stats.unknown_actions += 1;
        }
        e => {
            warn!("dropping undecodable frame ({} bytes): {}", len, e);
            stats.decode_failures += 1;
        }
    }
}

/// Applies one envelope on a blocking thread; repositories may do file I/O.
async fn apply(applier: Applier, envelope: Envelope, stats: &mut SessionStats) {
    let action = envelope.action();
    match tokio::task::spawn_blocking(move || applier.apply(&envelope)).await {
        Ok(Ok(outcome)) => {
            debug!(
                "applied {}: {} saved, {} deleted",
                action, outcome.saved, outcome.deleted
            );
            stats.applied += 1;
            stats.changes += outcome;
        }
        Ok(Err(e)) => {
            warn!("failed to apply {}: {}", action, e);
            stats.apply_failures += 1;
        }
        Err(e) => {
            warn!("apply task for {} did not finish: {}", action, e);
            stats.apply_failures += 1;
        }
    }
}

impl<S> std::fmt::Debug for ClientAgent<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAgent")
            .field("server", &self.server)
            .field("state", &*self.state.borrow())
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

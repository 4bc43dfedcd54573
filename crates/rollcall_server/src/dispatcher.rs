//! Routes personnel actions to connected clients.

use crate::error::{DeliveryFailure, ServerError, ServerResult};
use crate::registry::{ConnectionHandle, Registry};
use rollcall_protocol::{
    Action, ClientRecord, Codec, Envelope, PersonnelRecord, ProtocolError, DEFAULT_MAX_FRAME_SIZE,
};
use rollcall_store::{DeliveryLog, DeliveryRecord, PersonnelRepository};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Who a dispatch is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// The client registered at this peer address.
    Address(SocketAddr),
    /// The live client with this display name, e.g. `Client2`.
    Named(String),
    /// Every client registered when the call starts. Zero is fine.
    All,
}

impl Recipient {
    /// Addresses one client by display name.
    pub fn named(name: impl Into<String>) -> Self {
        Recipient::Named(name.into())
    }
}

impl From<SocketAddr> for Recipient {
    fn from(addr: SocketAddr) -> Self {
        Recipient::Address(addr)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Address(addr) => write!(f, "{addr}"),
            Recipient::Named(name) => f.write_str(name),
            Recipient::All => f.write_str("all clients"),
        }
    }
}

/// Outcome of one dispatch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Action that was sent.
    pub action: Action,
    /// Recipients whose socket accepted the frame, ordered by display index.
    pub delivered: Vec<ClientRecord>,
    /// Recipients that did not receive it, ordered by display index.
    pub failed: Vec<(ClientRecord, DeliveryFailure)>,
}

impl DispatchReport {
    fn empty(action: Action) -> Self {
        Self {
            action,
            delivered: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Number of recipients the call was addressed to.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// Returns true if every recipient received the frame.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends personnel actions to one client or to all of them.
///
/// Each call resolves its recipients from the registry, seals the envelope
/// once, and writes it to every recipient concurrently. A recipient that
/// is gone or does not accept the frame within the write timeout is
/// reported in [`DispatchReport::failed`]; the others are unaffected.
///
/// A `SAVE_ALL` whose sealed frame would exceed the frame limit is split
/// into several `SAVE_ALL` frames, written back to back to each recipient.
///
/// Errors from a call mean nothing was sent: an unknown client or ssn, a
/// repository failure, or an envelope that could not be sealed or does not
/// fit in a frame.
///
/// # Example
///
/// ```no_run
/// # async fn demo(dispatcher: rollcall_server::Dispatcher) -> rollcall_server::ServerResult<()> {
/// use rollcall_server::Recipient;
///
/// let report = dispatcher.send_save_all(&Recipient::All).await?;
/// println!("delivered to {} of {}", report.delivered.len(), report.attempted());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    personnel: Arc<dyn PersonnelRepository>,
    codec: Codec,
    write_timeout: Duration,
    max_frame_size: usize,
    audit: Option<Arc<dyn DeliveryLog>>,
}

type Delivery = (ClientRecord, Result<(), DeliveryFailure>);

/// One sealed frame and the plaintext it carries.
struct Sealed {
    payload: Vec<u8>,
    frame: Vec<u8>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        registry: Arc<Registry>,
        personnel: Arc<dyn PersonnelRepository>,
        codec: Codec,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            personnel,
            codec,
            write_timeout,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            audit: None,
        }
    }

    /// Caps the size of each sealed frame. Defaults to
    /// [`DEFAULT_MAX_FRAME_SIZE`], the clients' default read limit.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Records every successful delivery in `log`.
    pub fn with_audit(mut self, log: Arc<dyn DeliveryLog>) -> Self {
        self.audit = Some(log);
        self
    }

    /// The registry recipients are resolved from.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Sends one record as `SAVE`.
    pub async fn send_save(
        &self,
        record: PersonnelRecord,
        to: &Recipient,
    ) -> ServerResult<DispatchReport> {
        self.dispatch(Envelope::Save(record), to).await
    }

    /// Looks up the record with `ssn` and sends it as `SAVE`.
    ///
    /// # Errors
    ///
    /// [`ServerError::PersonnelNotFound`] if no record has this ssn.
    pub async fn send_save_by_ssn(&self, ssn: &str, to: &Recipient) -> ServerResult<DispatchReport> {
        let record = self
            .personnel
            .find_personnel_by_ssn(ssn)?
            .ok_or_else(|| ServerError::PersonnelNotFound(ssn.to_string()))?;
        self.send_save(record, to).await
    }

    /// Sends `DELETE` for `ssn`.
    ///
    /// The ssn need not exist here; clients treat deleting an absent
    /// record as a no-op.
    pub async fn send_delete(&self, ssn: &str, to: &Recipient) -> ServerResult<DispatchReport> {
        self.dispatch(
            Envelope::Delete {
                ssn: ssn.to_string(),
            },
            to,
        )
        .await
    }

    /// Sends every stored record as one `SAVE_ALL`.
    pub async fn send_save_all(&self, to: &Recipient) -> ServerResult<DispatchReport> {
        let records = self.personnel.list_all_personnel()?;
        self.dispatch(Envelope::SaveAll(records), to).await
    }

    /// Sends `DELETE_ALL`.
    pub async fn send_delete_all(&self, to: &Recipient) -> ServerResult<DispatchReport> {
        self.dispatch(Envelope::DeleteAll, to).await
    }

    /// Send one personnel record to one client.
    pub async fn send_one(&self, client: &str, ssn: &str) -> ServerResult<DispatchReport> {
        self.send_save_by_ssn(ssn, &Recipient::named(client)).await
    }

    /// Send one personnel record to every client.
    pub async fn send_all(&self, ssn: &str) -> ServerResult<DispatchReport> {
        self.send_save_by_ssn(ssn, &Recipient::All).await
    }

    /// Send all personnel to one client.
    pub async fn send_all_personnel(&self, client: &str) -> ServerResult<DispatchReport> {
        self.send_save_all(&Recipient::named(client)).await
    }

    /// Delete one personnel record from one client.
    pub async fn delete_one(&self, client: &str, ssn: &str) -> ServerResult<DispatchReport> {
        self.send_delete(ssn, &Recipient::named(client)).await
    }

    /// Delete one personnel record from every client.
    pub async fn delete_from_all(&self, ssn: &str) -> ServerResult<DispatchReport> {
        self.send_delete(ssn, &Recipient::All).await
    }

    /// Delete all personnel from one client.
    pub async fn delete_all_from_one(&self, client: &str) -> ServerResult<DispatchReport> {
        self.send_delete_all(&Recipient::named(client)).await
    }

    /// Delete all personnel from every client.
    pub async fn delete_all_from_all(&self) -> ServerResult<DispatchReport> {
        self.send_delete_all(&Recipient::All).await
    }

    fn resolve(&self, to: &Recipient) -> ServerResult<Vec<(ClientRecord, ConnectionHandle)>> {
        match to {
            Recipient::All => Ok(self.registry.resolve_all()),
            Recipient::Address(addr) => self
                .registry
                .resolve(*addr)
                .map(|target| vec![target])
                .ok_or_else(|| ServerError::ClientNotFound(addr.to_string())),
            Recipient::Named(name) => self
                .registry
                .lookup_by_name(name)
                .map(|target| vec![target])
                .ok_or_else(|| ServerError::ClientNotFound(name.clone())),
        }
    }

    /// Seals `envelope` once and writes the frame(s) to every resolved
    /// recipient.
    pub async fn dispatch(&self, envelope: Envelope, to: &Recipient) -> ServerResult<DispatchReport> {
        let action = envelope.action();
        let targets = self.resolve(to)?;
        if targets.is_empty() {
            info!("{} to {}: no clients connected", action, to);
            return Ok(DispatchReport::empty(action));
        }

        let records = envelope.record_count();
        let mut sealed = Vec::new();
        self.seal_into(envelope, &mut sealed)?;
        let (payloads, frames): (Vec<_>, Vec<_>) = sealed
            .into_iter()
            .map(|s| (s.payload, s.frame))
            .unzip();
        let frames: Arc<[Vec<u8>]> = frames.into();
        debug!(
            "{} ({} records, {} frame(s), {} bytes) to {} recipient(s)",
            action,
            records,
            frames.len(),
            frames.iter().map(Vec::len).sum::<usize>(),
            targets.len()
        );

        let mut tasks = JoinSet::new();
        let mut pending = BTreeMap::new();
        for (record, handle) in targets {
            pending.insert(record.id, record.clone());
            let frames = Arc::clone(&frames);
            let write_timeout = self.write_timeout;
            let max_frame_size = self.max_frame_size;
            tasks.spawn(async move {
                let outcome = deliver(&handle, &frames, write_timeout, max_frame_size).await;
                (record, outcome)
            });
        }
        let report = settle(action, tasks, pending).await;

        for payload in &payloads {
            self.audit(action, payload, &report.delivered);
        }
        info!(
            "{} to {}: {} delivered, {} failed",
            action,
            to,
            report.delivered.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Seals `envelope`, halving an oversized `SAVE_ALL` until every part
    /// fits in one frame. Parts keep the original record order.
    fn seal_into(&self, envelope: Envelope, out: &mut Vec<Sealed>) -> ServerResult<()> {
        let frame = self.codec.seal(&envelope)?;
        if frame.len() <= self.max_frame_size {
            out.push(Sealed {
                payload: envelope.to_json()?,
                frame,
            });
            return Ok(());
        }

        match envelope {
            Envelope::SaveAll(mut records) if records.len() > 1 => {
                let tail = records.split_off(records.len() / 2);
                self.seal_into(Envelope::SaveAll(records), out)?;
                self.seal_into(Envelope::SaveAll(tail), out)
            }
            other => Err(ServerError::EnvelopeTooLarge {
                action: other.action(),
                len: frame.len(),
                max: self.max_frame_size,
            }),
        }
    }

    fn audit(&self, action: Action, payload: &[u8], delivered: &[ClientRecord]) {
        let Some(log) = &self.audit else {
            return;
        };
        let payload = String::from_utf8_lossy(payload);
        for client in delivered {
            let entry = DeliveryRecord {
                client_id: client.id,
                client_name: client.display_name.clone(),
                action,
                payload: payload.clone().into_owned(),
            };
            if let Err(e) = log.record_delivery(entry) {
                warn!("failed to record delivery to {}: {}", client, e);
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("write_timeout", &self.write_timeout)
            .field("max_frame_size", &self.max_frame_size)
            .field("audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

/// Collects the delivery tasks into a report.
///
/// Every recipient in `pending` ends up in exactly one of the two lists; a
/// task that panicked or was cancelled counts as a failed delivery.
async fn settle(
    action: Action,
    mut tasks: JoinSet<Delivery>,
    mut pending: BTreeMap<u64, ClientRecord>,
) -> DispatchReport {
    let mut report = DispatchReport::empty(action);
    while let Some(joined) = tasks.join_next().await {
        let (record, outcome) = match joined {
            Ok(result) => result,
            Err(e) => {
                warn!("delivery task failed: {}", e);
                continue;
            }
        };
        pending.remove(&record.id);
        match outcome {
            Ok(()) => report.delivered.push(record),
            Err(failure) => {
                warn!("{} to {} failed: {}", action, record, failure);
                report.failed.push((record, failure));
            }
        }
    }

    for record in pending.into_values() {
        let failure = DeliveryFailure::Io("delivery task did not complete".to_string());
        warn!("{} to {} failed: {}", action, record, failure);
        report.failed.push((record, failure));
    }
    report.delivered.sort_by_key(|r| r.id);
    report.failed.sort_by_key(|(r, _)| r.id);
    report
}

/// Writes the frames of one dispatch to one recipient, in order.
///
/// A write that fails or times out may have left part of a frame on the
/// stream, so the connection is aborted and its own task reaps it.
async fn deliver(
    handle: &ConnectionHandle,
    frames: &[Vec<u8>],
    write_timeout: Duration,
    max_frame_size: usize,
) -> Result<(), DeliveryFailure> {
    let link = handle.upgrade().ok_or(DeliveryFailure::ConnectionLost)?;

    for frame in frames {
        match tokio::time::timeout(write_timeout, link.write(frame, max_frame_size)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                link.abort();
                return Err(classify(e));
            }
            Err(_) => {
                link.abort();
                return Err(DeliveryFailure::Timeout(write_timeout));
            }
        }
    }
    Ok(())
}

fn classify(error: ProtocolError) -> DeliveryFailure {
    use std::io::ErrorKind;

    match error {
        ProtocolError::Io(e)
            if matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::WriteZero
            ) =>
        {
            DeliveryFailure::ConnectionLost
        }
        other => DeliveryFailure::Io(other.to_string()),
    }
}

//! Registry of reachable clients.

use crate::error::ServerResult;
use parking_lot::Mutex;
use rollcall_protocol::{write_frame, ClientRecord, ProtocolResult};
use rollcall_store::ClientRepository;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncWrite;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The write path of one accepted connection.
///
/// Owned (through an `Arc`) by the connection task that accepted the
/// socket. Everyone else reaches it through a [`ConnectionHandle`], which
/// stops resolving once the owner drops it.
pub struct ConnectionLink {
    id: u64,
    addr: SocketAddr,
    writer: tokio::sync::Mutex<BoxedWriter>,
    abort: Notify,
}

impl ConnectionLink {
    /// Wraps the write half of a connection.
    pub fn new<W>(addr: SocketAddr, writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            abort: Notify::new(),
        })
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns a non-owning handle for the registry.
    pub fn handle(self: &Arc<Self>) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            addr: self.addr,
            link: Arc::downgrade(self),
        }
    }

    /// Asks the owning connection task to close the socket.
    ///
    /// Used after a failed or timed-out write, which may have left a
    /// partial frame on the stream.
    pub fn abort(&self) {
        self.abort.notify_one();
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        self.abort.notified().await;
    }

    /// Writes one frame. Concurrent writers are serialised so frames never
    /// interleave.
    pub(crate) async fn write(&self, frame: &[u8], max_frame_size: usize) -> ProtocolResult<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame, max_frame_size).await
    }
}

impl std::fmt::Debug for ConnectionLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLink")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// A lookup-only reference to a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    addr: SocketAddr,
    link: Weak<ConnectionLink>,
}

impl ConnectionHandle {
    /// Id of the connection this handle points at.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns true while the owning connection task holds the link.
    pub fn is_alive(&self) -> bool {
        self.link.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<ConnectionLink>> {
        self.link.upgrade()
    }
}

#[derive(Debug)]
struct Entry {
    record: ClientRecord,
    handle: ConnectionHandle,
}

/// Process-wide table of reachable clients, keyed by peer address.
///
/// Every operation takes the table lock once, so register, unregister and
/// reads never observe a half-applied change. Display indices are
/// allocated and the client record persisted inside the same critical
/// section, so two simultaneous registrations cannot receive the same name.
///
/// # Collisions
///
/// Registering an address that is already present replaces the handle
/// and keeps the existing record (last writer wins). The displaced
/// connection's own [`unregister_connection`](Self::unregister_connection)
/// then finds a different connection id and leaves the entry alone.
pub struct Registry {
    entries: Mutex<HashMap<SocketAddr, Entry>>,
    clients: Arc<dyn ClientRepository>,
}

impl Registry {
    /// Creates an empty registry that mirrors its records into `clients`.
    pub fn new(clients: Arc<dyn ClientRepository>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clients,
        }
    }

    /// Registers a connection and returns its client record.
    ///
    /// # Errors
    ///
    /// Returns an error if the client record cannot be persisted; the
    /// registry is left unchanged in that case.
    pub fn register(&self, handle: ConnectionHandle) -> ServerResult<ClientRecord> {
        let addr = handle.addr();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&addr) {
            warn!(
                "{} re-registered from connection {} (was {})",
                entry.record,
                handle.id(),
                entry.handle.id()
            );
            entry.handle = handle;
            return Ok(entry.record.clone());
        }

        let id = smallest_unused(entries.values().map(|e| e.record.id));
        let record = ClientRecord::new(id, addr);
        self.clients.upsert_client(record.clone())?;
        entries.insert(
            addr,
            Entry {
                record: record.clone(),
                handle,
            },
        );

        info!("registered {}", record);
        Ok(record)
    }

    /// Removes whatever entry is registered at `addr`.
    ///
    /// Idempotent: removing an absent entry returns `None`.
    pub fn unregister(&self, addr: SocketAddr) -> Option<ClientRecord> {
        let mut entries = self.entries.lock();
        let entry = entries.remove(&addr)?;
        self.forget(&entry.record);
        Some(entry.record)
    }

    /// Removes the entry at `addr` only if it still belongs to
    /// `connection_id`.
    pub fn unregister_connection(&self, addr: SocketAddr, connection_id: u64) -> Option<ClientRecord> {
        let mut entries = self.entries.lock();
        match entries.get(&addr) {
            Some(entry) if entry.handle.id() == connection_id => {}
            Some(_) => {
                debug!("{} belongs to a newer connection; not reaping", addr);
                return None;
            }
            None => return None,
        }
        let entry = entries.remove(&addr)?;
        self.forget(&entry.record);
        Some(entry.record)
    }

    /// Called with the table lock held.
    fn forget(&self, record: &ClientRecord) {
        if let Err(e) = self.clients.delete_client(&record.host, record.port) {
            warn!("failed to delete client record for {}: {}", record, e);
        }
        info!("unregistered {}", record);
    }

    /// Looks up the handle registered at `addr`.
    pub fn lookup(&self, addr: SocketAddr) -> Option<ConnectionHandle> {
        self.entries.lock().get(&addr).map(|e| e.handle.clone())
    }

    /// Looks up a live client by display name.
    pub fn lookup_by_name(&self, name: &str) -> Option<(ClientRecord, ConnectionHandle)> {
        self.entries
            .lock()
            .values()
            .find(|e| e.record.display_name == name)
            .map(|e| (e.record.clone(), e.handle.clone()))
    }

    /// Looks up the record and handle registered at `addr`.
    pub fn resolve(&self, addr: SocketAddr) -> Option<(ClientRecord, ConnectionHandle)> {
        self.entries
            .lock()
            .get(&addr)
            .map(|e| (e.record.clone(), e.handle.clone()))
    }

    /// Returns every record and handle, ordered by display index.
    pub fn resolve_all(&self) -> Vec<(ClientRecord, ConnectionHandle)> {
        let mut all: Vec<_> = self
            .entries
            .lock()
            .values()
            .map(|e| (e.record.clone(), e.handle.clone()))
            .collect();
        all.sort_by_key(|(record, _)| record.id);
        all
    }

    /// Returns every client record, ordered by display index.
    pub fn list_all(&self) -> Vec<ClientRecord> {
        self.resolve_all().into_iter().map(|(r, _)| r).collect()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no client is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("clients", &self.len())
            .finish_non_exhaustive()
    }
}

/// Smallest positive integer not in `used`.
fn smallest_unused(used: impl Iterator<Item = u64>) -> u64 {
    let used: BTreeSet<u64> = used.collect();
    (1..).find(|id| !used.contains(id)).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rollcall_store::{MemoryStore, StoreError, StoreResult};
    use std::collections::HashSet;
    use std::thread;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn registry() -> (Registry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Registry::new(store.clone()), store)
    }

    fn link(port: u16) -> Arc<ConnectionLink> {
        ConnectionLink::new(addr(port), tokio::io::sink())
    }

    #[test]
    fn smallest_unused_fills_gaps() {
        assert_eq!(smallest_unused([].into_iter()), 1);
        assert_eq!(smallest_unused([1, 2, 3].into_iter()), 4);
        assert_eq!(smallest_unused([1, 3, 4].into_iter()), 2);
        assert_eq!(smallest_unused([2, 3].into_iter()), 1);
    }

    #[test]
    fn register_assigns_names_and_persists() {
        let (registry, store) = registry();
        let (l1, l2) = (link(9001), link(9002));

        let c1 = registry.register(l1.handle()).unwrap();
        let c2 = registry.register(l2.handle()).unwrap();

        assert_eq!(c1.display_name, "Client1");
        assert_eq!(c2.display_name, "Client2");
        assert_eq!(store.list_all_clients().unwrap(), vec![c1, c2]);
    }

    #[test]
    fn reuses_lowest_freed_index() {
        let (registry, _) = registry();
        let links: Vec<_> = (9001..=9003).map(link).collect();
        for l in &links {
            registry.register(l.handle()).unwrap();
        }

        registry.unregister(addr(9002));
        let l4 = link(9004);
        let c4 = registry.register(l4.handle()).unwrap();
        assert_eq!(c4.id, 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let (registry, store) = registry();
        let l = link(9001);
        registry.register(l.handle()).unwrap();

        assert!(registry.unregister(addr(9001)).is_some());
        assert!(registry.unregister(addr(9001)).is_none());
        assert!(registry.is_empty());
        assert!(store.list_all_clients().unwrap().is_empty());
    }

    #[test]
    fn collision_overwrites_handle_and_keeps_record() {
        let (registry, _) = registry();
        let old = link(9001);
        let new = link(9001);

        let first = registry.register(old.handle()).unwrap();
        let second = registry.register(new.handle()).unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(addr(9001)).unwrap().id(), new.id());

        // The displaced connection exits and must not reap its successor.
        assert!(registry.unregister_connection(addr(9001), old.id()).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister_connection(addr(9001), new.id()).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn handle_dies_with_link() {
        let (registry, _) = registry();
        let l = link(9001);
        registry.register(l.handle()).unwrap();

        let handle = registry.lookup(addr(9001)).unwrap();
        assert!(handle.is_alive());
        drop(l);
        assert!(!handle.is_alive());
        assert!(handle.upgrade().is_none());
    }

    #[test]
    fn lookup_by_name() {
        let (registry, _) = registry();
        let (l1, l2) = (link(9001), link(9002));
        registry.register(l1.handle()).unwrap();
        registry.register(l2.handle()).unwrap();

        let (record, handle) = registry.lookup_by_name("Client2").unwrap();
        assert_eq!(record.port, 9002);
        assert_eq!(handle.id(), l2.id());
        assert!(registry.lookup_by_name("Client3").is_none());
    }

    struct FailingClients;

    impl ClientRepository for FailingClients {
        fn find_client_by_name(&self, _: &str) -> StoreResult<Option<ClientRecord>> {
            Ok(None)
        }
        fn find_client_by_address(&self, _: &str, _: u16) -> StoreResult<Option<ClientRecord>> {
            Ok(None)
        }
        fn list_all_clients(&self) -> StoreResult<Vec<ClientRecord>> {
            Ok(Vec::new())
        }
        fn upsert_client(&self, _: ClientRecord) -> StoreResult<()> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn delete_client(&self, _: &str, _: u16) -> StoreResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn failed_persist_leaves_registry_unchanged() {
        let registry = Registry::new(Arc::new(FailingClients));
        let l = link(9001);
        assert!(registry.register(l.handle()).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_registrations_get_distinct_names() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);

        let threads: Vec<_> = (0..16u16)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let links: Vec<_> = (0..8u16).map(|i| link(10_000 + t * 8 + i)).collect();
                    for l in &links {
                        registry.register(l.handle()).unwrap();
                    }
                    links
                })
            })
            .collect();
        let _links: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        let ids: BTreeSet<u64> = registry.list_all().iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 128);
        assert_eq!(ids, (1..=128).collect());
    }

    #[test]
    fn concurrent_register_and_unregister_stay_consistent() {
        let (registry, store) = registry();
        let registry = Arc::new(registry);

        let threads: Vec<_> = (0..8u16)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut held: HashMap<u16, Arc<ConnectionLink>> = HashMap::new();
                    for round in 0..96u16 {
                        let port = 20_000 + t * 12 + (round * 7 + t) % 12;
                        match held.remove(&port) {
                            None => {
                                let l = link(port);
                                registry.register(l.handle()).unwrap();
                                held.insert(port, l);
                            }
                            Some(old) if round % 5 == 0 => {
                                // Reconnect from the same address.
                                let before = registry.resolve(addr(port)).unwrap().0;
                                let l = link(port);
                                let after = registry.register(l.handle()).unwrap();
                                assert_eq!(before.id, after.id);
                                assert!(registry.unregister_connection(addr(port), old.id()).is_none());
                                held.insert(port, l);
                            }
                            Some(old) if round % 2 == 0 => {
                                assert!(registry.unregister(addr(port)).is_some());
                                drop(old);
                            }
                            Some(old) => {
                                assert!(registry
                                    .unregister_connection(addr(port), old.id())
                                    .is_some());
                            }
                        }
                    }
                    held
                })
            })
            .collect();
        let mut held: HashMap<u16, Arc<ConnectionLink>> = HashMap::new();
        for t in threads {
            held.extend(t.join().unwrap());
        }

        let resolved = registry.resolve_all();
        assert_eq!(resolved.len(), held.len());

        let ports: BTreeSet<u16> = resolved.iter().map(|(r, _)| r.port).collect();
        assert_eq!(ports.len(), resolved.len(), "duplicate address");
        assert_eq!(ports, held.keys().copied().collect());

        let mut ids = BTreeSet::new();
        for (record, handle) in &resolved {
            assert!(handle.is_alive(), "{record} has a dead handle");
            assert_eq!(handle.id(), held[&record.port].id());
            assert!(ids.insert(record.id), "duplicate index {}", record.id);
        }

        let stored: HashSet<_> = store.list_all_clients().unwrap().into_iter().collect();
        let listed: HashSet<_> = registry.list_all().into_iter().collect();
        assert_eq!(stored, listed);

        // New registrations fill the gaps left by the churn, lowest first.
        let mut fresh = Vec::new();
        let mut port = 30_000;
        while ids.len() < ids.last().copied().unwrap_or(0) as usize {
            let expected = smallest_unused(ids.iter().copied());
            let l = link(port);
            let record = registry.register(l.handle()).unwrap();
            assert_eq!(record.id, expected);
            ids.insert(record.id);
            fresh.push(l);
            port += 1;
        }
        let listed: Vec<u64> = registry.list_all().iter().map(|c| c.id).collect();
        assert_eq!(listed, (1..=listed.len() as u64).collect::<Vec<_>>());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u16),
        Unregister(u16),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u16..12).prop_map(Op::Register),
            (0u16..12).prop_map(Op::Unregister),
        ]
    }

    proptest! {
        #[test]
        fn listing_matches_model(ops in prop::collection::vec(op_strategy(), 1..64)) {
            let (registry, store) = registry();
            let mut links: HashMap<u16, Arc<ConnectionLink>> = HashMap::new();
            let mut model: HashMap<u16, u64> = HashMap::new();

            for op in ops {
                match op {
                    Op::Register(p) => {
                        let l = link(p);
                        let record = registry.register(l.handle()).unwrap();
                        match model.get(&p) {
                            Some(&id) => {
                                prop_assert_eq!(record.id, id);
                            }
                            None => {
                                let expected = smallest_unused(model.values().copied());
                                prop_assert_eq!(record.id, expected);
                                model.insert(p, record.id);
                            }
                        }
                        links.insert(p, l);
                    }
                    Op::Unregister(p) => {
                        let removed = registry.unregister(addr(p));
                        prop_assert_eq!(removed.is_some(), model.remove(&p).is_some());
                        links.remove(&p);
                    }
                }

                let listed = registry.list_all();
                let addrs: BTreeSet<_> = listed.iter().map(|c| (c.host.clone(), c.port)).collect();
                prop_assert_eq!(addrs.len(), listed.len());
                prop_assert_eq!(listed.len(), model.len());
                prop_assert_eq!(store.list_all_clients().unwrap(), listed.clone());

                for record in &listed {
                    let handle = registry.lookup(addr(record.port)).unwrap();
                    prop_assert!(handle.is_alive());
                    prop_assert_eq!(handle.id(), links[&record.port].id());
                }
            }
        }
    }
}

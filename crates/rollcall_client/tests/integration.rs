//! End-to-end tests: a real server and real client agents over loopback TCP.

use rollcall_client::{ClientAgent, ClientConfig, SessionStats};
use rollcall_protocol::{Action, PersonnelRecord, SharedKey};
use rollcall_server::{
    Dispatcher, Recipient, Registry, Repositories, Server, ServerConfig, ServerError,
    ShutdownHandle,
};
use rollcall_store::{DeliveryLog, FileStore, MemoryStore, PersonnelRepository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

struct TestServer {
    addr: SocketAddr,
    key: SharedKey,
    store: Arc<MemoryStore>,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    shutdown: ShutdownHandle,
    task: JoinHandle<rollcall_server::ServerResult<()>>,
}

impl TestServer {
    async fn start(personnel: Vec<PersonnelRecord>) -> Self {
        let key = SharedKey::generate();
        let store = Arc::new(MemoryStore::with_personnel(personnel));
        let config = ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))
            .with_write_timeout(Duration::from_secs(2));
        let server = Server::bind(config, &key, Repositories::in_memory(store.clone()))
            .await
            .unwrap();

        Self {
            addr: server.local_addr(),
            registry: server.registry(),
            dispatcher: server.dispatcher(),
            shutdown: server.shutdown_handle(),
            task: tokio::spawn(server.run()),
            key,
            store,
        }
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        timeout(Duration::from_secs(5), self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

struct TestClient {
    addr: SocketAddr,
    task: JoinHandle<SessionStats>,
}

async fn connect(server: &TestServer, store: Arc<dyn PersonnelRepository>) -> TestClient {
    let expected = server.registry.len() + 1;
    let agent = ClientAgent::connect(&ClientConfig::new(server.addr), &server.key, store)
        .await
        .unwrap();
    let addr = agent.local_addr().unwrap();
    let task = tokio::spawn(agent.run());
    wait_until(|| server.registry.len() >= expected).await;
    TestClient { addr, task }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        sleep(Duration::from_millis(10)).await;
    }
}

fn john() -> PersonnelRecord {
    PersonnelRecord::new("John", "Doe", "111-22-3333")
}

#[tokio::test]
async fn save_all_reaches_both_clients() {
    let server = TestServer::start(vec![john()]).await;
    let (s1, s2) = (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
    let c1 = connect(&server, s1.clone()).await;
    let c2 = connect(&server, s2.clone()).await;

    let report = server
        .dispatcher
        .send_save_all(&Recipient::All)
        .await
        .unwrap();
    assert_eq!(report.delivered.len(), 2);
    assert!(report.is_complete());

    wait_until(|| s1.personnel_count() == 1 && s2.personnel_count() == 1).await;
    for store in [&s1, &s2] {
        let all = store.list_all_personnel().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].same_content(&john()));
    }

    server.stop().await;
    for client in [c1, c2] {
        let stats = timeout(Duration::from_secs(5), client.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.applied, 1);
    }
}

#[tokio::test]
async fn save_all_larger_than_a_frame_arrives_whole() {
    let personnel: Vec<_> = (0..20_000u32)
        .map(|i| {
            PersonnelRecord::new(
                format!("Name{i}"),
                format!("Surname{i}"),
                format!("{:03}-{:02}-{:04}", i / 1_000_000, (i / 10_000) % 100, i % 10_000),
            )
        })
        .collect();
    let server = TestServer::start(personnel).await;
    let store = Arc::new(MemoryStore::new());
    let client = connect(&server, store.clone()).await;

    let report = server
        .dispatcher
        .send_save_all(&Recipient::All)
        .await
        .unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert!(report.is_complete());

    wait_until(|| store.personnel_count() == 20_000).await;
    assert_eq!(server.registry.len(), 1);
    let sent: Vec<String> = server
        .store
        .list_all_personnel()
        .unwrap()
        .into_iter()
        .map(|r| r.ssn)
        .collect();
    let received: Vec<String> = store
        .list_all_personnel()
        .unwrap()
        .into_iter()
        .map(|r| r.ssn)
        .collect();
    assert_eq!(received, sent);

    // One audit entry per frame the client accepted.
    let frames = server.store.list_deliveries().unwrap().len();
    assert!(frames > 1);

    server.stop().await;
    let stats = timeout(Duration::from_secs(5), client.task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.frames_received, frames as u64);
    assert_eq!(stats.applied, frames as u64);
    assert_eq!(stats.decode_failures, 0);
}

#[tokio::test]
async fn delete_to_unregistered_address_sends_nothing() {
    let server = TestServer::start(vec![john()]).await;
    let store = Arc::new(MemoryStore::new());
    let client = connect(&server, store.clone()).await;

    let absent: SocketAddr = "127.0.0.1:9".parse().unwrap();
    assert_ne!(client.addr, absent);
    let err = server
        .dispatcher
        .send_delete("999-99-9999", &Recipient::Address(absent))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::ClientNotFound(_)));
    assert!(err.is_not_found());
    assert!(server.store.list_deliveries().unwrap().is_empty());

    server.stop().await;
    let stats = client.task.await.unwrap();
    assert_eq!(stats.frames_received, 0);
}

#[tokio::test]
async fn dropped_client_is_reaped_and_others_still_served() {
    let server = TestServer::start(vec![john()]).await;
    let (s1, s2) = (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
    let c1 = connect(&server, s1).await;
    let c2 = connect(&server, s2.clone()).await;

    // Client one goes away without a goodbye.
    c1.task.abort();
    let _ = c1.task.await;

    let report = server
        .dispatcher
        .send_save_all(&Recipient::All)
        .await
        .unwrap();
    assert!(report.delivered.iter().any(|c| c.port == c2.addr.port()));

    wait_until(|| s2.personnel_count() == 1).await;
    wait_until(|| server.registry.lookup(c1.addr).is_none()).await;

    let remaining = server.registry.list_all();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].port, c2.addr.port());

    server.stop().await;
}

#[tokio::test]
async fn repeated_save_upserts_and_absent_delete_is_noop() {
    let server = TestServer::start(vec![john()]).await;
    let store = Arc::new(MemoryStore::new());
    let _client = connect(&server, store.clone()).await;
    let to = Recipient::All;

    server.dispatcher.send_save(john(), &to).await.unwrap();
    server
        .dispatcher
        .send_save(PersonnelRecord::new("Johnny", "Doe", "111-22-3333"), &to)
        .await
        .unwrap();
    server.dispatcher.delete_from_all("999-99-9999").await.unwrap();
    server
        .dispatcher
        .send_save(PersonnelRecord::new("Marker", "Last", "000-00-0001"), &to)
        .await
        .unwrap();

    // Frames on one connection arrive in order, so the marker comes last.
    wait_until(|| {
        store
            .find_personnel_by_ssn("000-00-0001")
            .unwrap()
            .is_some()
    })
    .await;

    let john = store.find_personnel_by_ssn("111-22-3333").unwrap().unwrap();
    assert_eq!(john.name, "Johnny");
    assert_eq!(store.personnel_count(), 2);

    let log = server.store.list_deliveries().unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log[2].action, Action::Delete);

    server.stop().await;
}

#[tokio::test]
async fn operator_tasks_by_client_name() {
    let server = TestServer::start(vec![
        john(),
        PersonnelRecord::new("Jane", "Smith", "444-55-6666"),
    ])
    .await;
    let (s1, s2) = (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
    let c1 = connect(&server, s1.clone()).await;
    let c2 = connect(&server, s2.clone()).await;

    let name_of = |addr: SocketAddr| {
        server
            .registry
            .list_all()
            .into_iter()
            .find(|c| c.port == addr.port())
            .map(|c| c.display_name)
            .unwrap()
    };
    let (n1, n2) = (name_of(c1.addr), name_of(c2.addr));

    server.dispatcher.send_all_personnel(&n1).await.unwrap();
    server.dispatcher.send_one(&n2, "444-55-6666").await.unwrap();
    wait_until(|| s1.personnel_count() == 2 && s2.personnel_count() == 1).await;

    server.dispatcher.delete_one(&n1, "111-22-3333").await.unwrap();
    wait_until(|| s1.personnel_count() == 1).await;

    server.dispatcher.delete_all_from_one(&n2).await.unwrap();
    wait_until(|| s2.personnel_count() == 0).await;

    server.dispatcher.send_all("111-22-3333").await.unwrap();
    wait_until(|| s1.personnel_count() == 2 && s2.personnel_count() == 1).await;

    let report = server.dispatcher.delete_all_from_all().await.unwrap();
    assert_eq!(report.delivered.len(), 2);
    wait_until(|| s1.personnel_count() == 0 && s2.personnel_count() == 0).await;

    assert!(matches!(
        server.dispatcher.send_one("Client99", "111-22-3333").await,
        Err(ServerError::ClientNotFound(_))
    ));
    assert!(matches!(
        server.dispatcher.send_one(&n1, "000-00-0000").await,
        Err(ServerError::PersonnelNotFound(_))
    ));

    server.stop().await;
}

#[tokio::test]
async fn file_backed_client_keeps_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.json");

    let server = TestServer::start(vec![
        john(),
        PersonnelRecord::new("David", "Taylor", "777-88-9999"),
    ])
    .await;
    let store = Arc::new(FileStore::open(&path).unwrap());
    let client = connect(&server, store.clone()).await;

    server
        .dispatcher
        .send_save_all(&Recipient::All)
        .await
        .unwrap();
    wait_until(|| store.list_all_personnel().unwrap().len() == 2).await;

    server.stop().await;
    client.task.await.unwrap();
    drop(store);

    let reopened = FileStore::open(&path).unwrap();
    let ssns: Vec<_> = reopened
        .list_all_personnel()
        .unwrap()
        .into_iter()
        .map(|r| r.ssn)
        .collect();
    assert_eq!(ssns, ["111-22-3333", "777-88-9999"]);
}

use crate::{config::BrokerConfig, metrics::BrokerMetrics};
use task_queue_core::QueueStore;
use task_queue_persistence::{PersistenceError, Snapshot};
use task_queue_protocol::{Command, Frame, LineCodec, Response};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use futures::{SinkExt, StreamExt};

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Main broker server
///
/// Every command runs the lease sweep and then its store operation while
/// holding the single store lock, so commands are linearizable.
pub struct Broker {
    config: Arc<BrokerConfig>,
    store: Arc<Mutex<QueueStore>>,
    metrics: Arc<BrokerMetrics>,
    visibility_timeout: Duration,
    /// Serialises snapshot writes so files land in capture order
    save_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl Broker {
    /// Create a broker, restoring the snapshot at the configured path if there is one.
    ///
    /// A snapshot that exists but cannot be read is an error.
    pub fn new(config: BrokerConfig) -> anyhow::Result<Self> {
        let path = &config.persistence.snapshot_path;
        let store = task_queue_persistence::load(path).map_err(|e| {
            error!("Failed to load snapshot {:?}: {}", path, e);
            e
        })?;

        let stats = store.stats();
        info!(
            "Loaded {} queue(s) with {} pending and {} leased task(s)",
            stats.queues, stats.pending, stats.leased
        );

        Self::with_store(config, store)
    }

    /// Create a broker around an existing store
    pub fn with_store(config: BrokerConfig, store: QueueStore) -> anyhow::Result<Self> {
        config.validate()?;
        let visibility_timeout = config.visibility_timeout()?;

        let metrics = BrokerMetrics::new()?;
        metrics.update_store(store.stats());

        Ok(Broker {
            config: Arc::new(config),
            store: Arc::new(Mutex::new(store)),
            metrics: Arc::new(metrics),
            visibility_timeout,
            save_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;

        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("Broker listening on {}", listener.local_addr()?);

        // Start background sweeper
        if self.config.lease.sweep_interval_secs > 0 {
            let broker = self.clone();
            tokio::spawn(async move {
                broker.background_tasks().await;
            });
        }

        // Accept connections
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            let broker = self.clone();
                            tokio::spawn(async move {
                                broker.metrics.connections_active.inc();
                                if let Err(e) = broker.handle_connection(stream, addr).await {
                                    warn!("Connection {} closed with error: {}", addr, e);
                                }
                                broker.metrics.connections_active.dec();
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        drop(listener);

        if self.config.persistence.save_on_shutdown {
            if let Err(e) = self.save_snapshot().await {
                error!("Failed to save snapshot on shutdown: {}", e);
            }
        }

        Ok(())
    }

    /// Serve one client: read a line, answer it, repeat until the peer closes
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> anyhow::Result<()> {
        let mut framed = Framed::new(stream, LineCodec::new());
        let flush_after = self.config.unterminated_line_timeout();
        let idle_period = flush_after.unwrap_or(std::time::Duration::MAX);
        // Buffered fragment size seen at the previous idle check
        let mut fragment_len = 0;

        loop {
            let next = tokio::select! {
                next = framed.next() => next,
                _ = tokio::time::sleep(idle_period), if flush_after.is_some() => {
                    let buffered = framed.read_buffer().len();
                    if buffered == 0 || buffered != fragment_len {
                        fragment_len = buffered;
                        continue;
                    }
                    fragment_len = 0;

                    // The client sent a command without a newline and went quiet
                    let mut fragment = framed.read_buffer_mut().split();
                    match framed.codec_mut().take_partial(&mut fragment) {
                        Some(frame) => Some(Ok(frame)),
                        None => continue,
                    }
                }
                _ = self.shutdown.cancelled() => break,
            };

            match next {
                Some(Ok(Frame::Line(line))) => {
                    fragment_len = 0;
                    let response = self.handle_line(&line).await;
                    framed.send(response).await?;
                }
                Some(Ok(Frame::Oversized)) => {
                    // The rest of the line is skipped by the codec
                    warn!(
                        "Line from {} exceeds {} bytes",
                        addr,
                        framed.codec().max_length()
                    );
                    self.metrics.inc_command("INVALID", "error");
                    framed.send(Response::Error).await?;
                }
                Some(Err(e)) => {
                    warn!("Read error from {}: {}", addr, e);
                    break;
                }
                None => break,
            }
        }

        debug!("Connection from {} closed", addr);
        Ok(())
    }

    /// Parse and execute one command line
    pub async fn handle_line(&self, line: &str) -> Response {
        match Command::parse(line) {
            Ok(command) => self.execute(command).await,
            Err(e) => {
                debug!("Rejected command line: {}", e);
                self.metrics.inc_command("INVALID", "error");
                Response::Error
            }
        }
    }

    /// Execute a parsed command against the store
    pub async fn execute(&self, command: Command) -> Response {
        let name = command.name();

        let response = match command {
            Command::Save => self.handle_save().await,
            Command::Add { queue, length, data } => {
                self.locked(|store| self.handle_add(store, &queue, length, &data))
            }
            Command::Get { queue } => self.locked(|store| Response::from(store.get_task(&queue))),
            Command::Ack { queue, id } => self.locked(|store| {
                let acked = parse_id(&id)
                    .map(|id| store.ack_task(&queue, &id))
                    .unwrap_or(false);
                if acked {
                    self.metrics.tasks_acked_total.inc();
                }
                Response::from_bool(acked)
            }),
            Command::In { queue, id } => self.locked(|store| {
                Response::from_bool(
                    parse_id(&id)
                        .map(|id| store.check_task(&queue, &id))
                        .unwrap_or(false),
                )
            }),
        };

        let outcome = if response.is_error() { "error" } else { "ok" };
        self.metrics.inc_command(name, outcome);

        response
    }

    /// Run `op` under the store lock, after requeueing expired leases
    fn locked<R>(&self, op: impl FnOnce(&mut QueueStore) -> R) -> R {
        let mut store = self.store.lock();
        self.sweep_locked(&mut store);

        let result = op(&mut *store);

        self.metrics.update_store(store.stats());
        result
    }

    fn handle_add(&self, store: &mut QueueStore, queue: &str, length: usize, data: &str) -> Response {
        match store.add_task(queue, length, data) {
            Ok(task_id) => {
                self.metrics.tasks_added_total.inc();
                Response::Added(task_id)
            }
            Err(e) => {
                warn!("Rejected ADD to queue {}: {}", queue, e);
                Response::Error
            }
        }
    }

    async fn handle_save(&self) -> Response {
        match self.save_snapshot().await {
            Ok(()) => Response::Ok,
            Err(e) => {
                error!("Failed to save snapshot: {}", e);
                Response::Error
            }
        }
    }

    /// Snapshot the store to the configured path.
    ///
    /// The snapshot is captured under the store lock and written on a blocking
    /// thread. Saves run one at a time, so a later SAVE never loses to an
    /// earlier one.
    pub async fn save_snapshot(&self) -> Result<(), PersistenceError> {
        let _save = self.save_lock.lock().await;

        let snapshot = Snapshot::capture(&self.store.lock());
        let path = self.config.persistence.snapshot_path.clone();

        let result = tokio::task::spawn_blocking(move || snapshot.write_to(path))
            .await
            .map_err(|e| PersistenceError::IoError(std::io::Error::other(e)))
            .and_then(|r| r);

        self.metrics
            .inc_snapshot(if result.is_ok() { "ok" } else { "error" });
        result
    }

    /// Requeue expired leases; returns how many were requeued
    pub fn sweep(&self) -> usize {
        let mut store = self.store.lock();
        let requeued = self.sweep_locked(&mut store);
        self.metrics.update_store(store.stats());
        requeued
    }

    fn sweep_locked(&self, store: &mut QueueStore) -> usize {
        let requeued = store.sweep_expired(Utc::now(), self.visibility_timeout);
        if requeued > 0 {
            self.metrics.leases_expired_total.inc_by(requeued as u64);
        }
        requeued
    }

    /// Background tasks (periodic lease sweep)
    async fn background_tasks(&self) {
        let period = std::time::Duration::from_secs(self.config.lease.sweep_interval_secs);
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep();
                }
                _ = self.shutdown.cancelled() => {
                    break;
                }
            }
        }
    }

    /// Get metrics registry
    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Get queue store
    pub fn store(&self) -> Arc<Mutex<QueueStore>> {
        self.store.clone()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Shutdown the broker
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Only the hyphenated lowercase form handed out by ADD names a task
fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::try_parse(id)
        .ok()
        .filter(|uuid| uuid.hyphenated().to_string() == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_broker(dir: &TempDir) -> Broker {
        let mut config = BrokerConfig::default();
        config.persistence.snapshot_path = dir.path().join("db.json");
        Broker::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_add_get_ack_scenario() {
        let dir = TempDir::new().unwrap();
        let broker = test_broker(&dir);

        let id = match broker.handle_line("ADD default 5 hello").await {
            Response::Added(id) => id,
            other => panic!("unexpected response {:?}", other),
        };

        let got = broker.handle_line("GET default").await;
        assert_eq!(got.to_string(), format!("{} 5 hello", id));

        assert_eq!(broker.handle_line(&format!("ACK default {}", id)).await, Response::Yes);
        assert_eq!(broker.handle_line(&format!("IN default {}", id)).await, Response::No);
        assert_eq!(broker.handle_line("GET default").await, Response::None);
    }

    #[tokio::test]
    async fn test_length_mismatch_scenario() {
        let dir = TempDir::new().unwrap();
        let broker = test_broker(&dir);

        assert!(matches!(broker.handle_line("ADD q 3 abc").await, Response::Added(_)));
        assert_eq!(broker.handle_line("ADD q 10 abc").await, Response::Error);

        let store = broker.store();
        assert_eq!(store.lock().queue("q").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let broker = test_broker(&dir);

        for line in ["", "FOO bar", "ADD q x abc", "GET", "ACK q", "IN a b c"] {
            assert_eq!(broker.handle_line(line).await, Response::Error, "line {:?}", line);
        }
    }

    #[tokio::test]
    async fn test_unknown_ids_are_no() {
        let dir = TempDir::new().unwrap();
        let broker = test_broker(&dir);

        assert_eq!(broker.handle_line("ACK q not-a-uuid").await, Response::No);
        assert_eq!(
            broker.handle_line(&format!("IN nowhere {}", Uuid::new_v4())).await,
            Response::No
        );
    }

    #[tokio::test]
    async fn test_only_canonical_ids_match() {
        let dir = TempDir::new().unwrap();
        let broker = test_broker(&dir);

        let Response::Added(id) = broker.handle_line("ADD q 1 x").await else {
            panic!("ADD failed");
        };

        let upper = id.hyphenated().to_string().to_uppercase();
        let simple = id.simple().to_string();
        let braced = id.braced().to_string();
        let urn = id.urn().to_string();
        for other in [upper, simple, braced, urn] {
            assert_eq!(broker.handle_line(&format!("IN q {}", other)).await, Response::No);
            assert_eq!(broker.handle_line(&format!("ACK q {}", other)).await, Response::No);
        }

        assert_eq!(broker.handle_line(&format!("ACK q {}", id)).await, Response::Yes);
    }

    #[tokio::test]
    async fn test_in_sees_pending_and_leased() {
        let dir = TempDir::new().unwrap();
        let broker = test_broker(&dir);

        let Response::Added(id) = broker.handle_line("add q 1 x").await else {
            panic!("ADD failed");
        };
        assert_eq!(broker.handle_line(&format!("in q {}", id)).await, Response::Yes);

        broker.handle_line("get q").await;
        assert_eq!(broker.handle_line(&format!("in q {}", id)).await, Response::Yes);
    }

    #[tokio::test]
    async fn test_expired_lease_is_requeued_on_next_command() {
        let dir = TempDir::new().unwrap();
        let mut config = BrokerConfig::default();
        config.persistence.snapshot_path = dir.path().join("db.json");
        config.lease.visibility_timeout_secs = 0;
        let broker = Broker::new(config).unwrap();

        let Response::Added(id) = broker.handle_line("ADD q 1 x").await else {
            panic!("ADD failed");
        };
        assert!(matches!(broker.handle_line("GET q").await, Response::Task(t) if t.id == id));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(matches!(broker.handle_line("GET q").await, Response::Task(t) if t.id == id));
        assert_eq!(broker.metrics().leases_expired_total.get(), 1);
    }

    #[tokio::test]
    async fn test_save_and_restore() {
        let dir = TempDir::new().unwrap();
        let broker = test_broker(&dir);

        broker.handle_line("ADD q 1 a").await;
        broker.handle_line("ADD q 1 b").await;
        broker.handle_line("GET q").await;
        assert_eq!(broker.handle_line("SAVE").await, Response::Ok);

        let restored = test_broker(&dir);
        let original = broker.store().lock().clone();
        assert_eq!(*restored.store().lock(), original);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves() {
        let dir = TempDir::new().unwrap();
        let broker = Arc::new(test_broker(&dir));

        let payload = "x".repeat(100_000);
        for _ in 0..20 {
            let line = format!("ADD q {} {}", payload.len(), payload);
            assert!(matches!(broker.handle_line(&line).await, Response::Added(_)));
        }

        for _ in 0..5 {
            let saves: Vec<_> = (0..8)
                .map(|_| {
                    let broker = broker.clone();
                    tokio::spawn(async move { broker.handle_line("SAVE").await })
                })
                .collect();

            for save in saves {
                assert_eq!(save.await.unwrap(), Response::Ok);
            }
        }

        let restored = task_queue_persistence::load(dir.path().join("db.json")).unwrap();
        assert_eq!(restored, *broker.store().lock());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(broker.metrics().snapshots_total.with_label_values(&["ok"]).get(), 40);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_serving() {
        let dir = TempDir::new().unwrap();
        let mut config = BrokerConfig::default();
        // A directory cannot be replaced by the snapshot file
        config.persistence.snapshot_path = dir.path().to_path_buf();
        let broker = Broker::with_store(config, QueueStore::new()).unwrap();

        assert_eq!(broker.handle_line("SAVE").await, Response::Error);
        assert!(matches!(broker.handle_line("ADD q 1 a").await, Response::Added(_)));
    }

    #[test]
    fn test_corrupt_snapshot_refuses_to_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, "{broken").unwrap();

        let mut config = BrokerConfig::default();
        config.persistence.snapshot_path = path;
        assert!(Broker::new(config).is_err());
    }
}

use super::manager::{Resolver, WorkerPool};
use super::worker::{Connector, SenderSettings, worker_loop};
use crate::engine::controller::RateController;
use crate::engine::throttle::LogThrottle;
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio_util::sync::CancellationToken;

fn addr(n: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, n], 9999))
}

fn settings() -> SenderSettings {
    SenderSettings {
        identity: "unit-test".into(),
        batch_size: 20,
        backoff: Duration::from_millis(500),
    }
}

fn throttle() -> LogThrottle {
    LogThrottle::new(Duration::from_secs(30))
}

/// Counts connection attempts per endpoint and always refuses.
#[derive(Clone, Default)]
struct CountingConnector {
    attempts: Arc<Mutex<HashMap<SocketAddr, usize>>>,
}

impl CountingConnector {
    fn attempts(&self, addr: SocketAddr) -> usize {
        self.attempts.lock().get(&addr).copied().unwrap_or(0)
    }
}

impl Connector for CountingConnector {
    type Stream = DuplexStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<DuplexStream> {
        *self.attempts.lock().entry(addr).or_default() += 1;
        Err(io::ErrorKind::ConnectionRefused.into())
    }
}

/// Hands out one side of an in-memory pipe and keeps the other for the test
/// to read back.
#[derive(Clone, Default)]
struct CapturingConnector {
    peers: Arc<Mutex<Vec<DuplexStream>>>,
}

impl Connector for CapturingConnector {
    type Stream = DuplexStream;

    async fn connect(&self, _addr: SocketAddr) -> io::Result<DuplexStream> {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        self.peers.lock().push(ours);
        Ok(theirs)
    }
}

/// Pops a scripted resolution result per cycle, repeating the last one.
#[derive(Clone)]
struct QueueResolver {
    results: Arc<Mutex<VecDeque<Vec<SocketAddr>>>>,
}

impl QueueResolver {
    fn new(results: Vec<Vec<SocketAddr>>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into_iter().collect())),
        }
    }
}

impl Resolver for QueueResolver {
    async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let mut results = self.results.lock();
        if results.len() > 1 {
            Ok(results.pop_front().unwrap_or_default())
        } else {
            Ok(results.front().cloned().unwrap_or_default())
        }
    }
}

fn make_pool<C: Connector + Clone, R: Resolver>(
    resolver: R,
    connector: C,
    controller: Arc<RateController>,
    cancel: CancellationToken,
) -> WorkerPool<C, R> {
    WorkerPool::new(
        resolver,
        connector,
        controller,
        settings(),
        throttle(),
        Duration::from_secs(5),
        cancel,
    )
}

#[tokio::test(start_paused = true)]
async fn worker_sends_identity_stamped_batches() {
    let controller = Arc::new(RateController::new(20));
    let connector = CapturingConnector::default();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(worker_loop(
        addr(1),
        controller,
        connector.clone(),
        settings(),
        throttle(),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    task.await.unwrap();

    let mut peers: Vec<DuplexStream> = connector.peers.lock().drain(..).collect();
    assert_eq!(peers.len(), 1, "one connection for the whole run");

    let mut buf = Vec::new();
    peers[0].read_to_end(&mut buf).await.unwrap();
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert!(lines.len() >= 20, "at least one full batch, got {}", lines.len());
    assert_eq!(lines.len() % 20, 0, "batches are never cut short");
    for line in lines {
        let rest = line
            .strip_prefix("[unit-test] ")
            .unwrap_or_else(|| panic!("unexpected line: {line:?}"));
        rest.parse::<u64>()
            .unwrap_or_else(|_| panic!("bad timestamp in line: {line:?}"));
    }
}

#[tokio::test(start_paused = true)]
async fn worker_stays_idle_while_stopped() {
    let controller = Arc::new(RateController::new(20));
    controller.stop();
    let connector = CountingConnector::default();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(worker_loop(
        addr(1),
        Arc::clone(&controller),
        connector.clone(),
        settings(),
        throttle(),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(addr(1)), 0);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn worker_retries_failed_connections_with_backoff() {
    let controller = Arc::new(RateController::new(20));
    let connector = CountingConnector::default();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(worker_loop(
        addr(1),
        controller,
        connector.clone(),
        settings(),
        throttle(),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let attempts = connector.attempts(addr(1));
    assert!(attempts >= 2, "expected repeated retries, got {attempts}");

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reconcile_converges_on_the_resolved_set() {
    let controller = Arc::new(RateController::new(20));
    let connector = CountingConnector::default();
    let cancel = CancellationToken::new();
    let mut pool = make_pool(QueueResolver::new(vec![]), connector, controller, cancel.clone());

    pool.reconcile(&[addr(1), addr(2)]);
    let tracked: HashSet<SocketAddr> = pool.tracked_endpoints().into_iter().collect();
    assert_eq!(tracked, HashSet::from([addr(1), addr(2)]));
    assert_eq!(pool.online(), 2);

    pool.reconcile(&[addr(2), addr(3)]);
    let tracked: HashSet<SocketAddr> = pool.tracked_endpoints().into_iter().collect();
    assert_eq!(tracked, HashSet::from([addr(2), addr(3)]));
    assert_eq!(pool.online(), 2);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn pruned_endpoint_sender_stops_attempting() {
    let controller = Arc::new(RateController::new(20));
    let connector = CountingConnector::default();
    let cancel = CancellationToken::new();
    let mut pool = make_pool(
        QueueResolver::new(vec![]),
        connector.clone(),
        controller,
        cancel.clone(),
    );

    pool.reconcile(&[addr(1), addr(2)]);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(connector.attempts(addr(1)) > 0);

    pool.reconcile(&[addr(2), addr(3)]);
    // Let the pruned sender observe its cancelled token.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let frozen = connector.attempts(addr(1));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(addr(1)), frozen, "pruned sender kept running");
    assert!(connector.attempts(addr(3)) > 0, "replacement sender never ran");

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn discovery_loop_tracks_resolution_changes() {
    let controller = Arc::new(RateController::new(20));
    let connector = CountingConnector::default();
    let cancel = CancellationToken::new();
    let resolver = QueueResolver::new(vec![
        vec![addr(1), addr(2)],
        vec![addr(2), addr(3)],
    ]);

    let pool = make_pool(resolver, connector.clone(), controller, cancel.clone());
    let gauge = pool.online_gauge();
    let task = tokio::spawn(pool.run());

    // First cycle fires immediately.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(gauge.load(std::sync::atomic::Ordering::Relaxed), 2);
    assert!(connector.attempts(addr(1)) > 0);

    // Second cycle swaps A for C.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(gauge.load(std::sync::atomic::Ordering::Relaxed), 2);
    let frozen = connector.attempts(addr(1));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempts(addr(1)), frozen);
    assert!(connector.attempts(addr(3)) > 0);

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(gauge.load(std::sync::atomic::Ordering::Relaxed), 0);
}

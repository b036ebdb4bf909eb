//! Discovery-driven pool manager.
//!
//! Resolves the receiver service name on a fixed interval and reconciles the
//! tracked endpoint set against the result: one sender task per resolved
//! address, spawned when the address first appears and cancelled when it
//! drops out of the resolution result. Resolution failures are treated as an
//! empty result for that cycle and logged through the shared throttle.

use super::worker::{Connector, SenderSettings, worker_loop};
use crate::engine::controller::RateController;
use crate::engine::throttle::LogThrottle;
use core::time::Duration;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Resolves the configured service name to its current endpoints.
pub trait Resolver: Send + Sync + 'static {
    fn resolve(&self) -> impl Future<Output = io::Result<Vec<SocketAddr>>> + Send;
}

/// DNS resolution through the runtime's host lookup.
#[derive(Clone, Debug)]
pub struct DnsResolver {
    pub service: String,
    pub port: u16,
}

impl Resolver for DnsResolver {
    async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((self.service.as_str(), self.port)).await?;
        Ok(addrs.collect())
    }
}

struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One sender task per discovered endpoint.
///
/// Worker tokens are children of the pool's shutdown token, so cancelling the
/// pool tears every sender down as well.
pub struct WorkerPool<C, R> {
    resolver: R,
    connector: C,
    controller: Arc<RateController>,
    settings: SenderSettings,
    throttle: LogThrottle,
    discovery_interval: Duration,
    workers: HashMap<SocketAddr, WorkerHandle>,
    online: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl<C, R> WorkerPool<C, R>
where
    C: Connector + Clone,
    R: Resolver,
{
    pub fn new(
        resolver: R,
        connector: C,
        controller: Arc<RateController>,
        settings: SenderSettings,
        throttle: LogThrottle,
        discovery_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            connector,
            controller,
            settings,
            throttle,
            discovery_interval,
            workers: HashMap::new(),
            online: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    /// Gauge of currently tracked sender tasks, shared with the control
    /// surface.
    pub fn online_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.online)
    }

    /// Number of tracked sender tasks.
    pub fn online(&self) -> usize {
        self.workers.len()
    }

    /// Addresses currently backed by a sender task.
    pub fn tracked_endpoints(&self) -> Vec<SocketAddr> {
        self.workers.keys().copied().collect()
    }

    /// Runs discovery cycles until the shutdown token fires, then waits for
    /// every sender task to wind down.
    pub async fn run(mut self) {
        tracing::info!(identity = %self.settings.identity, "discovery loop online");
        let mut ticker = tokio::time::interval(self.discovery_interval);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let resolved = match self.resolver.resolve().await {
                Ok(addrs) => addrs,
                Err(err) => {
                    if self.throttle.ready("dns") {
                        tracing::warn!(error = %err, "service resolution failed");
                    }
                    Vec::new()
                }
            };

            self.reconcile(&resolved);
        }

        self.shutdown().await;
    }

    /// Applies one discovery cycle's diff: spawn senders for new endpoints,
    /// cancel and forget the ones the resolver no longer reports.
    pub fn reconcile(&mut self, resolved: &[SocketAddr]) {
        for addr in resolved {
            if !self.workers.contains_key(addr) {
                self.spawn_worker(*addr);
            }
        }

        let current: HashSet<SocketAddr> = resolved.iter().copied().collect();
        let gone: Vec<SocketAddr> = self
            .workers
            .keys()
            .filter(|addr| !current.contains(addr))
            .copied()
            .collect();
        for addr in gone {
            if let Some(handle) = self.workers.remove(&addr) {
                tracing::info!(endpoint = %addr, "receiver left the pool");
                handle.cancel.cancel();
                drop(handle.task);
            }
        }

        self.online.store(self.workers.len(), Ordering::Relaxed);
    }

    fn spawn_worker(&mut self, addr: SocketAddr) {
        tracing::info!(endpoint = %addr, "receiver joined the pool");
        let cancel = self.cancel.child_token();
        let task = tokio::spawn(worker_loop(
            addr,
            Arc::clone(&self.controller),
            self.connector.clone(),
            self.settings.clone(),
            self.throttle.clone(),
            cancel.clone(),
        ));
        self.workers.insert(addr, WorkerHandle { cancel, task });
    }

    /// Waits for the remaining sender tasks after the shutdown token fired.
    /// Worker tokens are children of it, so each task exits on its own.
    async fn shutdown(&mut self) {
        for (addr, handle) in self.workers.drain() {
            if let Err(err) = handle.task.await {
                if !err.is_cancelled() {
                    tracing::warn!(endpoint = %addr, error = %err, "sender task failed");
                }
            }
        }
        self.online.store(0, Ordering::Relaxed);
        tracing::info!("sender pool drained");
    }
}

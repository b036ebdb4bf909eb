//! Per-endpoint sender task: connection lifecycle plus the paced send loop.
//!
//! Each task is bound to one endpoint for its entire life and cycles through
//! three phases: paused (global stop flag set; poll and do nothing),
//! connecting (bounded attempt, back off on failure) and sending (one
//! controller snapshot per batch, then sleep for the current rate). Every
//! connection or transmission failure is transient: log through the shared
//! throttle, back off, retry. Nothing here is ever fatal.

use crate::engine::controller::RateController;
use crate::engine::throttle::LogThrottle;
use core::time::Duration;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Opens a byte stream to an endpoint.
///
/// Seam between the send loop and the network so tests can substitute an
/// in-memory transport.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncWrite + Unpin + Send;

    fn connect(&self, addr: SocketAddr) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Production connector: TCP with a bounded connect timeout.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    pub timeout: Duration,
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out"),
            )),
        }
    }
}

/// Knobs shared by every sender task.
#[derive(Clone, Debug)]
pub struct SenderSettings {
    /// Identity stamped into every message, fixed for the process lifetime.
    pub identity: Arc<str>,
    /// Messages written per send cycle.
    pub batch_size: usize,
    /// Poll interval while paused and back-off after a failure.
    pub backoff: Duration,
}

/// Drives one endpoint until the token is cancelled.
pub async fn worker_loop<C: Connector>(
    endpoint: SocketAddr,
    controller: Arc<RateController>,
    connector: C,
    settings: SenderSettings,
    throttle: LogThrottle,
    cancel: CancellationToken,
) {
    tracing::debug!(%endpoint, "sender started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if controller.snapshot().stopped {
            if pause(&cancel, settings.backoff).await {
                break;
            }
            continue;
        }

        match connector.connect(endpoint).await {
            Ok(mut stream) => {
                tracing::debug!(%endpoint, "connected");
                match send_batches(&mut stream, &controller, &settings, &cancel).await {
                    // Stop requested: drop the connection and go back to
                    // polling the flag.
                    Ok(()) => {}
                    Err(err) => {
                        if throttle.ready(&endpoint.to_string()) {
                            tracing::warn!(%endpoint, error = %err, "transmission failed");
                        }
                        if pause(&cancel, settings.backoff).await {
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                if throttle.ready(&endpoint.to_string()) {
                    tracing::warn!(%endpoint, error = %err, "connection failed");
                }
                if pause(&cancel, settings.backoff).await {
                    break;
                }
            }
        }
    }

    tracing::debug!(%endpoint, "sender stopped");
}

/// Writes identity-stamped batches over an open connection until the stop
/// flag flips, the token fires, or the write fails.
///
/// The rate is re-read from the controller once per batch, so rate changes
/// take effect within one batch's latency, never mid-batch.
async fn send_batches<S>(
    stream: &mut S,
    controller: &RateController,
    settings: &SenderSettings,
    cancel: &CancellationToken,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    loop {
        let snap = controller.snapshot();
        if snap.stopped || cancel.is_cancelled() {
            return Ok(());
        }

        for _ in 0..settings.batch_size {
            let line = format!("[{}] {}\n", settings.identity, unix_seconds());
            stream.write_all(line.as_bytes()).await?;
        }

        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep(Duration::from_millis(snap.rate_ms)) => {}
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Sleeps for the poll/back-off interval; returns whether the token fired.
async fn pause(cancel: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(dur) => false,
    }
}

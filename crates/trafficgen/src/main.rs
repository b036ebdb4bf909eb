mod engine;

use clap::Parser;
use engine::api::{self, AppState};
use engine::config::{CliArgs, EngineConfig};
use engine::controller::RateController;
use engine::pool::manager::{DnsResolver, WorkerPool};
use engine::pool::worker::{SenderSettings, TcpConnector};
use engine::telemetry::init_telemetry;
use engine::throttle::LogThrottle;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = EngineConfig::try_from(args)?;

    init_telemetry()?;

    let controller = Arc::new(RateController::new(config.idle_rate_ms));
    let throttle = LogThrottle::new(config.log_throttle);
    let shutdown = CancellationToken::new();

    let pool = WorkerPool::new(
        DnsResolver {
            service: config.receiver_service.clone(),
            port: config.receiver_port,
        },
        TcpConnector {
            timeout: config.connect_timeout,
        },
        Arc::clone(&controller),
        SenderSettings {
            identity: Arc::clone(&config.identity),
            batch_size: config.batch_size,
            backoff: config.backoff,
        },
        throttle,
        config.discovery_interval,
        shutdown.clone(),
    );
    let workers_online = pool.online_gauge();
    let pool_task = tokio::spawn(pool.run());

    let app = api::router(AppState {
        controller,
        workers_online,
    });
    let listener = TcpListener::bind(config.control_addr).await?;
    tracing::info!(
        control_addr = %config.control_addr,
        receiver = %config.receiver_service,
        identity = %config.identity,
        "traffic generator online"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The control surface is down; wind down discovery and the senders.
    shutdown.cancel();
    pool_task.await?;
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

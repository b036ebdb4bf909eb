//! Startup configuration: CLI flags with env-var fallbacks, validated into
//! the owned [`EngineConfig`] the rest of the engine reads from.

use clap::Parser;
use core::time::Duration;
use std::net::SocketAddr;
use std::sync::Arc;

/// CLI arguments. Every knob can also come from the environment, so the
/// binary drops into a container spec without a wrapper script.
#[derive(Debug, Clone, Parser)]
#[command(name = "trafficgen")]
#[command(bin_name = "trafficgen")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// DNS name of the receiver service, resolved every discovery cycle
    #[arg(
        long,
        env = "RECEIVER_SERVICE",
        default_value = "traffic-receiver.dev.svc.cluster.local"
    )]
    pub receiver_service: String,

    /// Port the receivers listen on
    #[arg(long, env = "RECEIVER_PORT", default_value_t = 9999)]
    pub receiver_port: u16,

    /// Identity stamped into every message; defaults to HOSTNAME
    #[arg(long, env = "POD_NAME")]
    pub identity: Option<String>,

    /// Messages written per send cycle
    #[arg(long, env = "MESSAGES_PER_CONNECTION", default_value_t = 20)]
    pub batch_size: usize,

    /// Idle pacing interval in milliseconds, also the post-stop default
    #[arg(long, env = "IDLE_RATE_MS", default_value_t = 20)]
    pub idle_rate_ms: u64,

    /// Seconds between discovery cycles
    #[arg(long, env = "DISCOVERY_INTERVAL_SECS", default_value_t = 5)]
    pub discovery_interval_secs: u64,

    /// Milliseconds between stop-flag polls and connection retries
    #[arg(long, env = "BACKOFF_MS", default_value_t = 500)]
    pub backoff_ms: u64,

    /// Connection timeout in seconds
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 2)]
    pub connect_timeout_secs: u64,

    /// Window during which repeated failure logs for one key are suppressed
    #[arg(long, env = "LOG_THROTTLE_SECS", default_value_t = 30)]
    pub log_throttle_secs: u64,

    /// Listen address for the HTTP control surface
    #[arg(long, env = "CONTROL_ADDR", default_value = "0.0.0.0:5050")]
    pub control_addr: SocketAddr,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub receiver_service: String,
    pub receiver_port: u16,
    pub identity: Arc<str>,
    pub batch_size: usize,
    pub idle_rate_ms: u64,
    pub discovery_interval: Duration,
    pub backoff: Duration,
    pub connect_timeout: Duration,
    pub log_throttle: Duration,
    pub control_addr: SocketAddr,
}

impl TryFrom<CliArgs> for EngineConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> anyhow::Result<Self> {
        anyhow::ensure!(args.idle_rate_ms > 0, "idle rate must be greater than 0 ms");
        anyhow::ensure!(args.batch_size > 0, "batch size must be greater than 0");
        anyhow::ensure!(args.backoff_ms > 0, "backoff must be greater than 0 ms");
        anyhow::ensure!(
            args.discovery_interval_secs > 0,
            "discovery interval must be greater than 0 s"
        );

        // Under Kubernetes HOSTNAME is the pod name, which is exactly the
        // identity receivers expect when POD_NAME is not set explicitly.
        let identity = args
            .identity
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| String::from("trafficgen"));

        Ok(Self {
            receiver_service: args.receiver_service,
            receiver_port: args.receiver_port,
            identity: identity.into(),
            batch_size: args.batch_size,
            idle_rate_ms: args.idle_rate_ms,
            discovery_interval: Duration::from_secs(args.discovery_interval_secs),
            backoff: Duration::from_millis(args.backoff_ms),
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            log_throttle: Duration::from_secs(args.log_throttle_secs),
            control_addr: args.control_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CliArgs {
        CliArgs::parse_from(["trafficgen"])
    }

    #[test]
    fn defaults_mirror_the_idle_profile() {
        let config = EngineConfig::try_from(args()).unwrap();
        assert_eq!(config.idle_rate_ms, 20);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.receiver_port, 9999);
        assert_eq!(config.discovery_interval, Duration::from_secs(5));
        assert_eq!(config.backoff, Duration::from_millis(500));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.log_throttle, Duration::from_secs(30));
    }

    #[test]
    fn zero_idle_rate_is_rejected() {
        let mut args = args();
        args.idle_rate_ms = 0;
        assert!(EngineConfig::try_from(args).is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut args = args();
        args.batch_size = 0;
        assert!(EngineConfig::try_from(args).is_err());
    }

    #[test]
    fn explicit_identity_wins_over_hostname() {
        let mut args = args();
        args.identity = Some(String::from("sender-7"));
        let config = EngineConfig::try_from(args).unwrap();
        assert_eq!(&*config.identity, "sender-7");
    }
}

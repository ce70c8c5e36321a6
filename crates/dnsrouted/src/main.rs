//! DNS route lifecycle daemon
//!
//! Main entry point for dnsrouted. Wires the interface tracker and the
//! routing manager to the message broker, runs both on worker threads and
//! exits with the code of the first fatal error (0 on Ctrl-C).

use anyhow::{Context, Result};
use clap::Parser;
use dnsroute_types::IpAddress;
use dnsrouted::config::DEFAULT_CONFIG_PATH;
use dnsrouted::{
    DnsRouteConfig, MessageBroker, MonotonicClock, NetDevTracker, RouteSettings, RoutingManager,
    ShutdownHandler, ShutdownToken, TrackerSettings, WorkerHandle,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How often the main task checks for a published shutdown
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "dnsrouted", version, about = "DNS-driven route lifecycle daemon")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Managed interface, overrides the configuration file
    #[arg(short, long)]
    interface: Option<String>,

    /// Default log level, RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Route to request at startup as ADDRESS:TTL, may be repeated
    #[arg(long = "route", value_parser = parse_static_route)]
    routes: Vec<(IpAddress, u32)>,
}

fn parse_static_route(value: &str) -> std::result::Result<(IpAddress, u32), String> {
    let (addr, ttl) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected ADDRESS:TTL, got {:?}", value))?;
    let addr = addr.trim_start_matches('[').trim_end_matches(']');
    let ip = addr.parse::<IpAddress>().map_err(|e| e.to_string())?;
    let ttl = ttl.parse::<u32>().map_err(|e| format!("invalid ttl: {}", e))?;
    Ok((ip, ttl))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut config = DnsRouteConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(interface) = args.interface {
        config.interface.name = interface;
    }
    config.validate().context("invalid configuration")?;

    info!(interface = %config.interface.name, "dnsrouted: Starting");
    let exit_code = run_daemon(config, &args.routes).await;
    info!(exit_code, "dnsrouted: Exiting");

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set logger")?;
    Ok(())
}

/// Runs until Ctrl-C or a published `Shutdown`, returning the exit code.
async fn run_daemon(config: DnsRouteConfig, routes: &[(IpAddress, u32)]) -> i32 {
    let broker = Arc::new(MessageBroker::new());
    let shutdown = Arc::new(ShutdownHandler::new());
    broker.subscribe(shutdown.clone());

    let token = ShutdownToken::new();
    let manager = Arc::new(RoutingManager::new(
        RouteSettings::from_config(&config),
        Arc::new(MonotonicClock::new()),
        broker.clone(),
        token.clone(),
    ));
    broker.subscribe(manager.clone());
    let tracker = Arc::new(NetDevTracker::new(
        TrackerSettings::from_config(&config),
        broker.clone(),
        token.clone(),
    ));

    let mut workers = Vec::new();
    if manager
        .open_kernel_socket(config.netlink.recv_buffer_size)
        .is_ok()
        && tracker.initialize().is_ok()
    {
        for (ip, ttl) in routes {
            manager.insert_route(*ip, *ttl);
        }
        match WorkerHandle::start(manager.clone()) {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                error!(error = %e, "Failed to start routing manager");
                shutdown.request(e.exit_code());
            }
        }
        match WorkerHandle::start(tracker.clone()) {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                error!(error = %e, "Failed to start interface tracker");
                shutdown.request(e.exit_code());
            }
        }
    }

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while !shutdown.is_requested() {
        tokio::select! {
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => info!("dnsrouted: Received SIGINT"),
                    Err(e) => warn!(error = %e, "dnsrouted: Signal handler failed"),
                }
                break;
            }
            _ = tokio::time::sleep(SHUTDOWN_POLL_INTERVAL) => {}
        }
    }

    token.cancel();
    for worker in workers {
        let name = worker.name().to_string();
        if let Err(e) = worker.join() {
            warn!(worker = %name, error = %e, "Worker exited with error");
        }
    }
    info!(stats = %manager.stats(), "dnsrouted: Workers stopped");
    shutdown.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_static_route() {
        let (ip, ttl) = parse_static_route("1.2.3.4:30").unwrap();
        assert_eq!(ip.to_string(), "1.2.3.4");
        assert_eq!(ttl, 30);

        let (ip, ttl) = parse_static_route("[2001:db8::1]:60").unwrap();
        assert_eq!(ip.to_string(), "2001:db8::1");
        assert_eq!(ttl, 60);

        assert!(parse_static_route("1.2.3.4").is_err());
        assert!(parse_static_route("1.2.3.4:x").is_err());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["dnsrouted"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(args.interface.is_none());
        assert_eq!(args.log_level, "info");
        assert!(args.routes.is_empty());
    }
}

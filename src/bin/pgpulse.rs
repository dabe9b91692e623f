//! pgpulse - PostgreSQL operational dashboard driver.
//!
//! Connects to one server, polls statistics on a configurable cadence,
//! and logs a one-line summary per sample. Connection parameters follow
//! the standard environment variables (PGHOST, PGPORT, PGUSER,
//! PGPASSWORD, PGDATABASE), overridable by flags.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use pgpulse::control::{ControlResponse, PgStatsSource, StatsService, control_channel};
use pgpulse::credentials::EnvCredentials;
use pgpulse::fmt::{format_bytes, format_rate};
use pgpulse::pool::{ConnectionIdentity, ConnectionPool, PgConnector};
use pgpulse::presenter::{Presenter, RefreshInterval};
use pgpulse::rates::RateSample;

/// PostgreSQL operational dashboard.
#[derive(Parser)]
#[command(name = "pgpulse", about = "PostgreSQL operational dashboard", version)]
struct Args {
    /// Server host. Defaults to PGHOST or localhost.
    #[arg(long)]
    host: Option<String>,

    /// Server port. Defaults to PGPORT or 5432.
    #[arg(long)]
    port: Option<u16>,

    /// Role to connect as. Defaults to PGUSER or $USER.
    #[arg(short, long)]
    user: Option<String>,

    /// Database to monitor. Defaults to PGDATABASE or the user name.
    #[arg(short, long)]
    dbname: Option<String>,

    /// Refresh interval in seconds. 0 disables the timer.
    #[arg(short, long, default_value = "10")]
    interval: u64,

    /// Connect timeout in seconds.
    #[arg(long, default_value = "15")]
    connect_timeout: u64,

    /// Emit samples as JSON lines on stdout instead of log summaries.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pgpulse={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Merges flags with the PG* environment into a connection identity.
fn resolve_identity(args: &Args) -> ConnectionIdentity {
    let host = args
        .host
        .clone()
        .or_else(|| std::env::var("PGHOST").ok())
        .unwrap_or_else(|| "localhost".to_string());
    let port = args
        .port
        .or_else(|| std::env::var("PGPORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(5432);
    let username = args
        .user
        .clone()
        .or_else(|| std::env::var("PGUSER").ok())
        .or_else(|| std::env::var("USER").ok());
    let database = args
        .dbname
        .clone()
        .or_else(|| std::env::var("PGDATABASE").ok())
        .or_else(|| username.clone());

    ConnectionIdentity {
        connection_id: format!("{}:{}", host, port),
        host,
        port,
        username,
        database,
    }
}

/// One-line summary of a sample for the log.
fn describe_sample(sample: &RateSample) -> String {
    let s = &sample.snapshot;
    format!(
        "db={} size={} conns={} ({} active, {} idle) queries={} locks={} commits={} rollbacks={}",
        s.database,
        format_bytes(s.size_bytes),
        s.connections.total,
        s.connections.active,
        s.connections.idle,
        s.active_queries.len(),
        s.blocking_locks.len(),
        format_rate(sample.rates.commits_s),
        format_rate(sample.rates.rollbacks_s),
    )
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let identity = resolve_identity(&args);
    info!("pgpulse {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Target: {}:{} database={}",
        identity.host,
        identity.port,
        identity.database_name()
    );

    let pool = ConnectionPool::with_timeout(
        PgConnector,
        Arc::new(EnvCredentials),
        Duration::from_secs(args.connect_timeout),
    );

    let (channel, service_channel) = control_channel();
    let source = PgStatsSource::new(pool.clone(), identity.clone());
    let service = tokio::spawn(StatsService::new(source, service_channel).run());

    let mut responses = channel.responses;
    let mut presenter = Presenter::new(channel.requests);
    presenter.set_interval(if args.interval == 0 {
        RefreshInterval::Off
    } else {
        RefreshInterval::Secs(args.interval)
    });
    presenter.start(Instant::now());

    let mut driver = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = driver.tick() => {
                presenter.tick(Instant::now());
            }
            response = responses.recv() => {
                let Some(response) = response else {
                    warn!("stats service stopped");
                    break;
                };
                match &response {
                    ControlResponse::StatsUpdated(sample) => {
                        if args.json {
                            match serde_json::to_string(sample.as_ref()) {
                                Ok(line) => println!("{}", line),
                                Err(e) => warn!("failed to serialize sample: {}", e),
                            }
                        } else {
                            info!("{}", describe_sample(sample));
                        }
                    }
                    ControlResponse::DetailResult(table) => {
                        info!(kind = %table.kind, rows = table.rows.len(), "detail listing received");
                    }
                    ControlResponse::CollectionFailed(reason) => {
                        warn!("collection failed: {}", reason);
                    }
                    ControlResponse::CommandFailed { action, reason } => {
                        warn!("{} failed: {}", action, reason);
                    }
                }
                presenter.handle_response(response);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    // Dropping the presenter closes the request channel; the service
    // loop drains and stops.
    drop(presenter);
    let _ = service.await;
    pool.release_all().await;

    info!("Shutdown complete");
}

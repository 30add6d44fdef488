use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use chrona_collector::Collector;
use chrona_config::Config;
use chrona_schedule::Scheduler;
use chrona_store::SnapshotStore;
use chrona_timetravel::Engine;
use chrona_vcs::VersionStore;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod render;

#[derive(Parser, Debug)]
#[command(name = "chronactl", version, about = "Cluster snapshot time machine: capture, drift, history, time travel")]
struct Cli {
    /// Config file (default: ./config.yaml when present)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Path to kubeconfig file (overrides config)
    #[arg(long = "kubeconfig", global = true)]
    kubeconfig: Option<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture a point-in-time snapshot and commit it
    Snapshot,
    /// Show differences between two snapshots
    Diff {
        /// Start time (ISO-8601 with timezone)
        #[arg(long = "from")]
        from: Option<String>,
        /// End time (ISO-8601 with timezone)
        #[arg(long = "to")]
        to: Option<String>,
        /// Compare a specific commit against the latest snapshot
        #[arg(long = "commit")]
        commit: Option<String>,
    },
    /// Detect drift between live state and the last snapshot
    Drift,
    /// List committed snapshots
    History {
        /// Maximum entries to show (0 = all)
        #[arg(short = 'n', long = "limit", default_value_t = 20)]
        limit: usize,
    },
    /// Continuously capture snapshots on a schedule
    Watch {
        /// Cron schedule (overrides config)
        #[arg(long = "schedule")]
        schedule: Option<String>,
    },
    /// Print version information
    Version,
}

fn init_tracing(cfg: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { cfg.log.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::from_str(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if cfg.log.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CHRONA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid CHRONA_METRICS_ADDR; expected host:port");
        }
    }
}

/// SIGINT/SIGTERM cancel the root token; the in-flight capture drains.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn parse_time(label: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid {} time {:?} (use ISO-8601 with timezone)", label, raw))
}

/// One full capture: collect, write the tree, commit. Returns the new commit
/// hash, empty when the cluster was unchanged.
async fn run_capture(cfg: &Config, cancel: &CancellationToken) -> Result<String> {
    let collector = Collector::connect(cfg).await?;
    let mut snapshot = collector.collect(cancel).await?;

    let store = SnapshotStore::new(&cfg.snapshot.output_dir);
    store.write(&snapshot)?;

    let vcs = VersionStore::open_or_init(&cfg.snapshot.output_dir, &cfg.git)?;
    let commit_hash = vcs.commit(&snapshot.metadata)?;
    if !commit_hash.is_empty() {
        snapshot.metadata.commit_hash = commit_hash.clone();
        render::snapshot_summary(&snapshot.metadata);
    } else {
        println!("No changes detected, skipping commit.");
    }
    Ok(commit_hash)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = chrona_config::load(cli.config.as_deref())?;
    if let Some(kubeconfig) = &cli.kubeconfig {
        cfg.kubeconfig = kubeconfig.clone();
    }
    init_tracing(&cfg, cli.verbose);
    init_metrics();

    match cli.command {
        Commands::Snapshot => {
            info!("snapshot invoked");
            let cancel = CancellationToken::new();
            spawn_signal_handler(cancel.clone());
            run_capture(&cfg, &cancel).await?;
        }
        Commands::Diff { from, to, commit } => {
            info!(from = ?from, to = ?to, commit = ?commit, "diff invoked");
            let store = SnapshotStore::new(&cfg.snapshot.output_dir);
            let vcs = VersionStore::open_or_init(&cfg.snapshot.output_dir, &cfg.git)?;
            let engine = Engine::new(vcs, store);

            let (base, target) = match (&commit, &from, &to) {
                (Some(hash), _, _) => {
                    let base = engine.snapshot_by_commit(hash)?;
                    let target = engine.store().read().context(
                        "failed to read current snapshot (run 'chronactl snapshot' first)",
                    )?;
                    (base, target)
                }
                (None, Some(from), Some(to)) => {
                    let from = parse_time("--from", from)?;
                    let to = parse_time("--to", to)?;
                    engine.compare_time_range(from, to)?
                }
                _ => return Err(anyhow!("specify either --commit or both --from and --to")),
            };

            let report = chrona_analyzer::compare(&base, &target);
            match cli.output {
                Output::Human => print!("{}", chrona_analyzer::render_report(&report)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Commands::Drift => {
            info!("drift invoked");
            let store = SnapshotStore::new(&cfg.snapshot.output_dir);
            let last = store
                .read()
                .context("failed to read last snapshot (run 'chronactl snapshot' first)")?;

            let cancel = CancellationToken::new();
            spawn_signal_handler(cancel.clone());
            let collector = Collector::connect(&cfg).await?;
            let live = collector.collect(&cancel).await?;

            let report = chrona_analyzer::compare(&last, &live);
            match cli.output {
                Output::Human => {
                    print!("{}", chrona_analyzer::render_report(&report));
                    if report.has_drift() {
                        println!("Run 'chronactl snapshot' to capture the current state.");
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Commands::History { limit } => {
            info!(limit, "history invoked");
            let vcs = VersionStore::open_or_init(&cfg.snapshot.output_dir, &cfg.git)?;
            let entries = vcs.history(limit)?;
            let total = vcs.commit_count()?;

            match cli.output {
                Output::Human => {
                    if limit > 0 && total > limit {
                        println!("Showing last {} of {} snapshots", limit, total);
                    }
                    render::history_table(&entries);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            }
        }
        Commands::Watch { schedule } => {
            let schedule = schedule.unwrap_or_else(|| cfg.watch.schedule.clone());
            info!(schedule = %schedule, "watch invoked");
            println!("Starting continuous watch with schedule: {}", schedule);
            println!("Press Ctrl+C to stop.");

            let capture: chrona_schedule::CaptureFn = Arc::new({
                let cfg = cfg.clone();
                move |cancel: CancellationToken| {
                    let cfg = cfg.clone();
                    Box::pin(async move { run_capture(&cfg, &cancel).await.map(|_| ()) })
                }
            });
            let scheduler = Scheduler::new(&schedule, capture)?;

            let cancel = CancellationToken::new();
            spawn_signal_handler(cancel.clone());

            // Take an initial snapshot immediately; a failure here is not fatal.
            info!("taking initial snapshot");
            if let Err(e) = run_capture(&cfg, &cancel).await {
                warn!(error = %format!("{:#}", e), "initial snapshot failed");
            }

            scheduler.start(cancel).await?;
        }
        Commands::Version => {
            println!("chronactl {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

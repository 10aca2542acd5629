use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reach_scan_rs::aggregator::{ProgressFn, SharedProgress};
use reach_scan_rs::export::{self, ExportSchema};
use reach_scan_rs::ports::{self, PortSet};
use reach_scan_rs::probe::SystemNetwork;
use reach_scan_rs::types::{
    now_local, ProbeTarget, ScanOptions, DEFAULT_CONCURRENCY, DEFAULT_PING_TIMEOUT_MS,
    DEFAULT_PORT_TIMEOUT_MS,
};
use reach_scan_rs::{logging, scanner, targets};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// reach-scan-rs — ping and TCP port liveness sweep with bounded concurrency and CSV export.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "reach-scan-rs",
    version,
    about = "Ping and TCP port liveness sweep with bounded concurrency and CSV export.",
    long_about = None
)]
struct Cli {
    /// Targets: hostnames, IPs or IPv4 CIDRs separated by commas or whitespace.
    #[arg(long)]
    targets: Option<String>,

    /// File with targets (same syntax as --targets, `#` comments allowed).
    #[arg(long = "targets-file")]
    targets_file: Option<PathBuf>,

    /// Ports to check, e.g. "80, 443 8080". Invalid tokens are dropped.
    #[arg(long, default_value = "")]
    ports: String,

    /// Ports list file (one port or range per line).
    #[arg(long = "ports-file")]
    ports_file: Option<PathBuf>,

    /// Max probes in flight at once.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Ping reply timeout in milliseconds.
    #[arg(long = "ping-timeout-ms", default_value_t = DEFAULT_PING_TIMEOUT_MS)]
    ping_timeout_ms: u64,

    /// TCP connect timeout per port in milliseconds.
    #[arg(long = "port-timeout-ms", default_value_t = DEFAULT_PORT_TIMEOUT_MS)]
    port_timeout_ms: u64,

    /// CSV output path.
    #[arg(long, default_value = "reach_scan_results.csv")]
    output: PathBuf,

    /// CSV path used when --output cannot be written [default: temp dir, named by run time].
    #[arg(long)]
    fallback: Option<PathBuf>,

    /// Sort rows by target instead of completion order.
    #[arg(long, default_value_t = false)]
    sort: bool,

    /// Print the summary as JSON instead of text.
    #[arg(long = "json-summary", default_value_t = false)]
    json_summary: bool,

    /// Debug logging for every individual check.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_cli_logger(cli.verbose);

    let targets = collect_targets(&cli)?;
    let ports = collect_ports(&cli)?;
    let options = ScanOptions {
        concurrency: cli.concurrency,
        ping_timeout: Duration::from_millis(cli.ping_timeout_ms),
        port_timeout: Duration::from_millis(cli.port_timeout_ms),
    };
    let schema = ExportSchema::from_ports(&ports);
    let run_started = now_local();
    let fallback = cli
        .fallback
        .clone()
        .unwrap_or_else(|| export::default_fallback_path(run_started));

    println!("reach-scan-rs configuration:");
    println!("  targets      : {}", targets.len());
    println!("  ports        : {:?}", ports.as_slice());
    println!("  concurrency  : {}", options.concurrency);
    println!("  ping_timeout : {} ms", cli.ping_timeout_ms);
    println!("  port_timeout : {} ms", cli.port_timeout_ms);
    println!("  output       : {}", cli.output.display());
    println!("  fallback     : {}", fallback.display());

    // Ctrl-C stops dispatching; whatever finished still gets exported.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight probes");
            cancel_ctrlc.cancel();
        }
    });

    let bar = progress_bar(targets.len() as u64);
    let shared = SharedProgress::new();
    let bar_cb = bar.clone();
    let counters = shared.clone();
    let on_progress: ProgressFn = Arc::new(move |done: usize, _total: usize| {
        let (_, _, reachable) = counters.snapshot();
        bar_cb.set_position(done as u64);
        bar_cb.set_message(format!("{reachable} reachable"));
    });

    let results = scanner::scan_targets_with_progress(
        Arc::new(SystemNetwork),
        &targets,
        &ports,
        options,
        cancel,
        shared,
        Some(on_progress),
    )
    .await?;
    bar.finish_and_clear();

    let results = if cli.sort {
        results.sorted_by_target()
    } else {
        results
    };
    if results.cancelled {
        println!(
            "Scan interrupted: {} of {} targets probed",
            results.len(),
            results.total
        );
    }

    let stdout = io::stdout();
    let report = export::export(
        &results,
        &schema,
        &cli.output,
        &fallback,
        &mut stdout.lock(),
    )
    .context("results could not be written anywhere")?;

    info!(failed_tiers = report.failures.len(), "export complete");
    println!("\nResults written to {}", report.outcome);
    if cli.json_summary {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
    } else {
        print!("{}", report.summary);
    }

    Ok(())
}

fn collect_targets(cli: &Cli) -> Result<Vec<ProbeTarget>> {
    let mut out = Vec::new();
    if let Some(t) = cli.targets.as_deref() {
        out.extend(targets::parse_targets_str(t).context("invalid --targets")?);
    }
    if let Some(path) = cli.targets_file.as_deref() {
        out.extend(targets::load_targets_from_path(path)?);
    }
    if out.is_empty() {
        warn!("no targets given; the run will produce an empty result set");
    }
    Ok(out)
}

fn collect_ports(cli: &Cli) -> Result<PortSet> {
    let mut set = ports::parse_port_tokens(&cli.ports);
    if let Some(path) = cli.ports_file.as_deref() {
        for p in ports::load_ports_from_path(path)?.iter() {
            set.insert(p);
        }
    }
    Ok(set)
}

fn progress_bar(total: u64) -> ProgressBar {
    if total == 0 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
    {
        bar.set_style(style);
    }
    bar
}

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::{self, ProgressFn, SharedProgress};
use crate::ports::PortSet;
use crate::probe::{probe, Network};
use crate::types::{ProbeTarget, ResultSet, ScanOptions};

/// Upper bound applied to the requested concurrency.
pub const MAX_CONCURRENCY: usize = 5_000;

/// Probe every target (ping plus each port) with at most `options.concurrency` probes in flight.
///
/// - Limits in-flight probes using a `Semaphore`; a permit is taken before a worker is spawned.
/// - Each ping and each port connect is bounded by its own timeout inside the worker.
/// - Results arrive in completion order, one per target.
pub async fn scan_targets<N>(
    network: Arc<N>,
    targets: &[ProbeTarget],
    ports: &PortSet,
    options: ScanOptions,
) -> Result<ResultSet>
where
    N: Network + ?Sized + 'static,
{
    scan_targets_internal(network, targets, ports, options, None, None, None).await
}

/// Variant that accepts a `CancellationToken` to allow external cancellation.
///
/// Once cancelled no new probes start; probes already running finish or time out and
/// the partial result set is returned with `cancelled` set.
pub async fn scan_targets_with_cancel<N>(
    network: Arc<N>,
    targets: &[ProbeTarget],
    ports: &PortSet,
    options: ScanOptions,
    cancel: CancellationToken,
) -> Result<ResultSet>
where
    N: Network + ?Sized + 'static,
{
    scan_targets_internal(network, targets, ports, options, Some(cancel), None, None).await
}

/// Variant exposing live counters and a per-target progress callback.
///
/// `shared` is updated before `on_progress` fires, so the callback may read it.
pub async fn scan_targets_with_progress<N>(
    network: Arc<N>,
    targets: &[ProbeTarget],
    ports: &PortSet,
    options: ScanOptions,
    cancel: CancellationToken,
    shared: SharedProgress,
    on_progress: Option<ProgressFn>,
) -> Result<ResultSet>
where
    N: Network + ?Sized + 'static,
{
    scan_targets_internal(
        network,
        targets,
        ports,
        options,
        Some(cancel),
        Some(shared),
        on_progress,
    )
    .await
}

async fn scan_targets_internal<N>(
    network: Arc<N>,
    targets: &[ProbeTarget],
    ports: &PortSet,
    options: ScanOptions,
    cancel_opt: Option<CancellationToken>,
    shared_opt: Option<SharedProgress>,
    on_progress: Option<ProgressFn>,
) -> Result<ResultSet>
where
    N: Network + ?Sized + 'static,
{
    let total = targets.len();
    if total == 0 {
        info!("no targets supplied, nothing to probe");
        return Ok(ResultSet::empty());
    }

    let concurrency = options.concurrency.clamp(1, MAX_CONCURRENCY);
    let ping_timeout = options.ping_timeout;
    let port_timeout = options.port_timeout;
    let cancel = cancel_opt.unwrap_or_default();
    let sem = Arc::new(Semaphore::new(concurrency));
    let ports = Arc::new(ports.clone());

    let (sink, collector) = aggregator::channel(total, shared_opt.unwrap_or_default());
    let collector = collector.with_progress(on_progress);

    info!(
        targets = total,
        ports = ports.len(),
        concurrency,
        ping_timeout_ms = ping_timeout.as_millis() as u64,
        port_timeout_ms = port_timeout.as_millis() as u64,
        "scan started"
    );
    let started = Instant::now();

    let dispatch = async {
        let mut set = JoinSet::new();
        let mut dispatched = 0usize;

        for target in targets {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = sem.clone().acquire_owned() => permit.context("semaphore closed")?,
            };
            let network = network.clone();
            let ports = ports.clone();
            let sink = sink.clone();
            let target = target.clone();

            set.spawn(async move {
                let _permit = permit; // keep permit until the probe completes
                let result =
                    probe(&*network, &target, &ports, ping_timeout, port_timeout).await;
                sink.emit(result);
            });
            dispatched += 1;
        }

        // Workers hold the remaining sinks; the collector stops once they are all gone.
        drop(sink);
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "probe worker did not complete");
            }
        }
        Ok::<usize, anyhow::Error>(dispatched)
    };

    let (dispatched, entries) = tokio::join!(dispatch, collector.collect());
    let dispatched = dispatched?;
    let cancelled = dispatched < total;

    if cancelled {
        warn!(
            dispatched,
            total,
            collected = entries.len(),
            "scan cancelled, returning partial results"
        );
    } else if entries.len() != total {
        warn!(
            expected = total,
            collected = entries.len(),
            "result count does not match target count"
        );
    }
    info!(
        collected = entries.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan finished"
    );

    Ok(ResultSet {
        total,
        cancelled,
        entries,
    })
}

use std::io::{self, Write};
use std::sync::Arc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::client::Transport;
use crate::config::Config;
use crate::controller::run_controller;
use crate::demand::{DemandProfile, TICK};
use crate::metrics::LoadMetrics;
use crate::reporter::{Reporter, Summary};
use crate::stats::RunState;
use crate::worker::{run_worker, WorkerContext};

/// Run one closed-loop load test to completion.
///
/// Spawns `config.max_pool` workers and the controller, writes the report to
/// `sink` once per second, and after the deadline joins every task before the
/// final row and summary are computed.
pub async fn run_load_test<W: Write>(
    config: &Config,
    profile: DemandProfile,
    transport: Arc<dyn Transport>,
    metrics: Option<Arc<LoadMetrics>>,
    sink: W,
) -> io::Result<Summary> {
    let pool_capacity = profile.pool_capacity();
    let state = Arc::new(RunState::new(pool_capacity, config.sla_ms));

    let start = Instant::now();
    let deadline = start.checked_add(config.test_duration).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("test duration {:?} is too large", config.test_duration),
        )
    })?;

    info!(
        url = %config.request.url,
        method = %config.request.method,
        workers = pool_capacity,
        duration_secs = config.test_duration.as_secs(),
        demand_source = profile.kind(),
        "Starting load test"
    );

    let ctx = Arc::new(WorkerContext {
        state: state.clone(),
        transport,
        request: config.request.clone(),
        request_timeout: config.request_timeout,
        think_mean_ms: config.think_mean_ms,
        deadline,
        metrics: metrics.clone(),
    });

    let mut workers = Vec::with_capacity(pool_capacity);
    for worker_id in 0..pool_capacity {
        workers.push(tokio::spawn(run_worker(worker_id, ctx.clone())));
    }
    drop(ctx);

    let controller = tokio::spawn(run_controller(
        profile,
        state.clone(),
        metrics,
        start,
        deadline,
    ));

    let mut reporter = Reporter::new(sink, state.clone(), start);
    reporter.write_header()?;

    let mut ticker = time::interval_at(start + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let stop = time::sleep_until(deadline);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                reporter.tick()?;
            }
        }
    }
    let elapsed = start.elapsed();

    // No counter may move after the final snapshot.
    let mut completed = 0u64;
    for handle in workers {
        match handle.await {
            Ok(count) => completed += count,
            Err(e) => warn!(error = %e, "Worker task failed"),
        }
    }
    if let Err(e) = controller.await {
        warn!(error = %e, "Controller task failed");
    }

    let summary = reporter.finish(elapsed)?;
    info!(
        total_requests = summary.total_requests,
        total_good = summary.total_good,
        worker_completed = completed,
        goodput_ratio = summary.goodput_ratio,
        "Load test finished"
    );

    Ok(summary)
}

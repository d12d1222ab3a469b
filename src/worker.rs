use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, trace};

use crate::client::{RequestSpec, Transport};
use crate::errors::ErrorCategory;
use crate::metrics::LoadMetrics;
use crate::stats::RunState;

/// How long an inactive worker sleeps before re-checking the threshold.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause after a transport failure so a dead target is not hammered in a hot loop.
pub const ERROR_BACKOFF: Duration = Duration::from_millis(5);

/// Floor for the uniform draw in think-time sampling; `ln(0)` is infinite.
const MIN_UNIFORM: f64 = 1e-12;

/// Everything a worker needs, shared by the whole pool.
pub struct WorkerContext {
    pub state: Arc<RunState>,
    pub transport: Arc<dyn Transport>,
    pub request: RequestSpec,
    pub request_timeout: Duration,
    /// Mean exponential think time in milliseconds; 0 disables it.
    pub think_mean_ms: u64,
    /// Run deadline shared by every task.
    pub deadline: Instant,
    pub metrics: Option<Arc<LoadMetrics>>,
}

/// Draw an exponentially distributed think time with the given mean.
///
/// Inverse-transform sampling: `-ln(U) * mean`, `U` uniform on `(0, 1]`.
pub fn exponential_think_time<R: Rng>(mean_ms: u64, rng: &mut R) -> Duration {
    if mean_ms == 0 {
        return Duration::ZERO;
    }
    let u = (1.0 - rng.gen::<f64>()).max(MIN_UNIFORM);
    let micros = -u.ln() * mean_ms as f64 * 1000.0;
    Duration::from_micros(micros as u64)
}

/// Sleep for `duration`, cut short at the deadline.
async fn sleep_bounded(duration: Duration, deadline: Instant) {
    let wake = Instant::now()
        .checked_add(duration)
        .map_or(deadline, |wake| wake.min(deadline));
    time::sleep_until(wake).await;
}

/// Runs one closed-loop worker until the run deadline.
///
/// The worker only sends while its identity index is below the published
/// active concurrency. Raising the threshold wakes workers from the idle poll;
/// lowering it parks the highest-indexed ones once their in-flight request
/// finishes. Returns the number of requests this worker completed.
pub async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>) -> u64 {
    trace!(worker_id = worker_id, "Worker starting");

    let mut rng = StdRng::from_entropy();
    let mut completed = 0u64;

    loop {
        if Instant::now() >= ctx.deadline {
            break;
        }

        if !ctx.state.active.admits(worker_id) {
            sleep_bounded(IDLE_POLL_INTERVAL, ctx.deadline).await;
            continue;
        }

        let request_start = Instant::now();
        let result = tokio::select! {
            result = ctx.transport.send(&ctx.request, ctx.request_timeout) => result,
            // A request still in flight when the run ends is abandoned, not counted.
            _ = time::sleep_until(ctx.deadline) => break,
        };
        let elapsed = request_start.elapsed();
        let latency_us = elapsed.as_micros() as u64;

        let (status, failed) = match result {
            Ok(outcome) => {
                if let Some(metrics) = &ctx.metrics {
                    metrics.response_bytes_total.inc_by(outcome.bytes);
                    if let Some(category) = ErrorCategory::from_status_code(outcome.status) {
                        metrics.record_error(category);
                    }
                }
                (Some(outcome.status), false)
            }
            Err(e) => {
                debug!(
                    worker_id = worker_id,
                    error = %e,
                    error_category = e.category.label(),
                    "Request failed"
                );
                if let Some(metrics) = &ctx.metrics {
                    metrics.record_error(e.category);
                }
                (None, true)
            }
        };

        let good = ctx.state.record_outcome(status, latency_us);
        completed += 1;

        if let Some(metrics) = &ctx.metrics {
            metrics.requests_total.inc();
            metrics
                .request_duration_seconds
                .observe(elapsed.as_secs_f64());
            if good {
                metrics.good_requests_total.inc();
            }
        }

        if failed {
            sleep_bounded(ERROR_BACKOFF, ctx.deadline).await;
        }

        if ctx.think_mean_ms > 0 {
            let think = exponential_think_time(ctx.think_mean_ms, &mut rng);
            sleep_bounded(think, ctx.deadline).await;
        }
    }

    trace!(
        worker_id = worker_id,
        completed = completed,
        "Worker stopping after duration limit"
    );
    completed
}

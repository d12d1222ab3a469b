use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::demand::{DemandProfile, DemandTick, TICK};
use crate::metrics::LoadMetrics;
use crate::stats::RunState;

/// Advance the profile by one tick and publish the result.
///
/// The published value is clamped a second time by [`crate::stats::ActiveConcurrency`]
/// so the threshold can never exceed the spawned pool.
pub fn apply_tick<R: Rng>(
    profile: &mut DemandProfile,
    state: &RunState,
    metrics: Option<&LoadMetrics>,
    elapsed: time::Duration,
    rng: &mut R,
) -> DemandTick {
    let tick = profile.next_tick(elapsed, rng);
    let published = state.active.publish(tick.target);

    if let Some(metrics) = metrics {
        metrics.target_concurrency.set(tick.requested);
        metrics.active_concurrency.set(published as i64);
    }

    DemandTick {
        requested: tick.requested,
        target: published,
    }
}

/// Single writer of the active-concurrency threshold.
///
/// Publishes the first target immediately, then once per second until the
/// deadline.
pub async fn run_controller(
    mut profile: DemandProfile,
    state: Arc<RunState>,
    metrics: Option<Arc<LoadMetrics>>,
    start: Instant,
    deadline: Instant,
) {
    info!(
        source = profile.kind(),
        pool_capacity = profile.pool_capacity(),
        "Controller starting"
    );

    let mut rng = StdRng::from_entropy();
    let mut ticker = time::interval_at(start, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stop = time::sleep_until(deadline);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            now = ticker.tick() => {
                let elapsed = now.saturating_duration_since(start);
                let tick = apply_tick(&mut profile, &state, metrics.as_deref(), elapsed, &mut rng);
                debug!(
                    elapsed_s = elapsed.as_secs(),
                    requested = tick.requested,
                    active = tick.target,
                    "Published active concurrency"
                );
            }
        }
    }

    debug!("Controller stopping");
}

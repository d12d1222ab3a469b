//! Demand profiles: the target concurrency for every one-second tick.
//!
//! Exactly one [`DemandSource`] drives a run. It is chosen once at
//! configuration time with precedence trace > phases > sine > default and is
//! never re-evaluated afterwards. [`DemandProfile`] walks the chosen source one
//! tick at a time, applies optional jitter and clamps the result to the worker
//! pool capacity.

use rand::Rng;
use std::f64::consts::PI;
use thiserror::Error;
use tokio::time::Duration;

use crate::utils::parse_duration_string;

/// Built-in ramp/spike/settle pattern used when no demand input is configured.
pub const DEFAULT_PHASES: &str = "20s@128,15s@1024,25s@256,10s@2048,30s@384";

/// The default phase list repeats once.
pub const DEFAULT_PHASE_LOOPS: u32 = 1;

/// Upper bound for the jitter percentage.
pub const MAX_JITTER_PCT: u32 = 50;

pub const TICK: Duration = Duration::from_secs(1);

/// Errors produced while parsing demand inputs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DemandError {
    #[error("invalid phase {0:?} (want DUR@CONNS)")]
    PhaseFormat(String),

    #[error("phase {phase:?} duration: {reason}")]
    PhaseDuration { phase: String, reason: String },

    #[error("phase {phase:?} conns: {reason}")]
    PhaseConcurrency { phase: String, reason: String },

    #[error("invalid sine token {0:?}")]
    SineToken(String),

    #[error("unknown sine key {0:?}")]
    SineKey(String),

    #[error("sine.{key}: {reason}")]
    SineValue { key: &'static str, reason: String },

    #[error("sine requires period>0 and 0<=low<high")]
    SineBounds,
}

/// One step of a phase list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub duration: Duration,
    pub concurrency: usize,
}

/// Parse a comma list of `DUR@CONNS` phases, e.g. `30s@128,10s@1024`.
///
/// A blank string yields an empty list.
pub fn parse_phases(s: &str) -> Result<Vec<Phase>, DemandError> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }

    s.split(',')
        .map(|raw| {
            let phase = raw.trim();
            let (dur, conns) = phase
                .split_once('@')
                .filter(|(_, c)| !c.contains('@'))
                .ok_or_else(|| DemandError::PhaseFormat(phase.to_string()))?;

            let duration =
                parse_duration_string(dur).map_err(|reason| DemandError::PhaseDuration {
                    phase: phase.to_string(),
                    reason,
                })?;
            let concurrency =
                conns
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| DemandError::PhaseConcurrency {
                        phase: phase.to_string(),
                        reason: e.to_string(),
                    })?;

            Ok(Phase {
                duration,
                concurrency,
            })
        })
        .collect()
}

/// The built-in phase list.
pub fn default_phases() -> Vec<Phase> {
    // The constant is covered by tests; an error here would be a typo in it.
    parse_phases(DEFAULT_PHASES).unwrap_or_default()
}

/// Sinusoidal oscillation between `low` and `high` with the given period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SineSpec {
    pub period: Duration,
    pub low: usize,
    pub high: usize,
}

impl SineSpec {
    /// Parse `period=60s,low=64,high=2048`. A blank string means "no sine".
    pub fn parse(s: &str) -> Result<Option<Self>, DemandError> {
        if s.trim().is_empty() {
            return Ok(None);
        }

        let mut period = Duration::ZERO;
        let mut low: i64 = 0;
        let mut high: i64 = 0;

        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| DemandError::SineToken(token.to_string()))?;
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "period" => {
                    period = parse_duration_string(value).map_err(|reason| {
                        DemandError::SineValue {
                            key: "period",
                            reason,
                        }
                    })?;
                }
                "low" => low = parse_sine_int("low", value)?,
                "high" => high = parse_sine_int("high", value)?,
                _ => return Err(DemandError::SineKey(key)),
            }
        }

        if period.is_zero() || low < 0 || high <= low {
            return Err(DemandError::SineBounds);
        }

        Ok(Some(Self {
            period,
            low: low as usize,
            high: high as usize,
        }))
    }

    /// `round(mid + amp * sin(2π * (t mod period) / period))`.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let period_ns = self.period.as_nanos();
        let phase = (elapsed.as_nanos() % period_ns) as f64 / period_ns as f64;
        let mid = (self.low + self.high) as f64 / 2.0;
        let amp = (self.high - self.low) as f64 / 2.0;
        (mid + amp * (2.0 * PI * phase).sin()).round().max(0.0) as usize
    }
}

fn parse_sine_int(key: &'static str, value: &str) -> Result<i64, DemandError> {
    value.parse::<i64>().map_err(|e| DemandError::SineValue {
        key,
        reason: e.to_string(),
    })
}

/// The single authoritative demand input for a run.
#[derive(Debug, Clone, PartialEq)]
pub enum DemandSource {
    /// Replay per-second values; hold the last one once exhausted.
    Trace(Vec<usize>),

    /// Walk a phase list, repeating it `loops` additional times.
    Phases { phases: Vec<Phase>, loops: u32 },

    /// Stateless sinusoid over elapsed run time.
    Sine(SineSpec),

    /// Built-in phase list with one repeat.
    Default,
}

impl DemandSource {
    /// Pick the source by precedence: trace > phases > sine > default.
    pub fn select(
        trace: Option<Vec<usize>>,
        phases: Vec<Phase>,
        phase_loops: u32,
        sine: Option<SineSpec>,
    ) -> Self {
        match (trace, phases.is_empty(), sine) {
            (Some(trace), _, _) if !trace.is_empty() => DemandSource::Trace(trace),
            (_, false, _) => DemandSource::Phases {
                phases,
                loops: phase_loops,
            },
            (_, true, Some(sine)) => DemandSource::Sine(sine),
            _ => DemandSource::Default,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DemandSource::Trace(_) => "trace",
            DemandSource::Phases { .. } => "phases",
            DemandSource::Sine(_) => "sine",
            DemandSource::Default => "default",
        }
    }
}

/// Position within a phase list.
#[derive(Debug, Clone)]
struct PhaseCursor {
    phases: Vec<Phase>,
    index: usize,
    remaining: Duration,
    loops_remaining: u32,
}

impl PhaseCursor {
    fn new(phases: Vec<Phase>, loops: u32) -> Self {
        let remaining = phases.first().map(|p| p.duration).unwrap_or_default();
        Self {
            phases,
            index: 0,
            remaining,
            loops_remaining: loops,
        }
    }

    /// Yield the current phase's target, then consume one second of it.
    fn next(&mut self) -> usize {
        let Some(current) = self.phases.get(self.index) else {
            return 0;
        };
        let target = current.concurrency;

        self.remaining = self.remaining.saturating_sub(TICK);
        if self.remaining.is_zero() {
            self.index += 1;
            if self.index >= self.phases.len() {
                if self.loops_remaining > 0 {
                    self.loops_remaining -= 1;
                    self.index = 0;
                } else {
                    // Out of loops: freeze on the last phase.
                    self.index = self.phases.len() - 1;
                }
            }
            self.remaining = self.phases[self.index].duration;
        }

        target
    }
}

#[derive(Debug, Clone)]
enum SourceState {
    Trace {
        values: Vec<usize>,
        position: usize,
        last: usize,
    },
    Phases(PhaseCursor),
    Sine(SineSpec),
}

/// Result of one controller tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandTick {
    /// Source value after jitter, before clamping.
    pub requested: i64,
    /// Value clamped to `[0, pool_capacity]`.
    pub target: usize,
}

/// Stateful walk over a [`DemandSource`].
#[derive(Debug, Clone)]
pub struct DemandProfile {
    state: SourceState,
    kind: &'static str,
    jitter_pct: u32,
    pool_capacity: usize,
}

impl DemandProfile {
    /// `jitter_pct` is clamped into `[0, 50]`.
    pub fn new(source: DemandSource, jitter_pct: u32, pool_capacity: usize) -> Self {
        let kind = source.kind();
        let state = match source {
            DemandSource::Trace(values) => SourceState::Trace {
                values,
                position: 0,
                last: 0,
            },
            DemandSource::Phases { phases, loops } => {
                SourceState::Phases(PhaseCursor::new(phases, loops))
            }
            DemandSource::Sine(spec) => SourceState::Sine(spec),
            DemandSource::Default => {
                SourceState::Phases(PhaseCursor::new(default_phases(), DEFAULT_PHASE_LOOPS))
            }
        };

        Self {
            state,
            kind,
            jitter_pct: jitter_pct.min(MAX_JITTER_PCT),
            pool_capacity,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    /// Advance one tick and return the source value, without jitter or clamping.
    ///
    /// `elapsed` is wall time since run start; only the sine source reads it.
    pub fn next_raw(&mut self, elapsed: Duration) -> usize {
        match &mut self.state {
            SourceState::Trace {
                values,
                position,
                last,
            } => {
                if let Some(v) = values.get(*position) {
                    *last = *v;
                    *position += 1;
                }
                *last
            }
            SourceState::Phases(cursor) => cursor.next(),
            SourceState::Sine(spec) => spec.target_at(elapsed),
        }
    }

    /// Advance one tick: source value, then jitter, then clamp.
    pub fn next_tick<R: Rng>(&mut self, elapsed: Duration, rng: &mut R) -> DemandTick {
        let raw = self.next_raw(elapsed);
        let requested = apply_jitter(raw, self.jitter_pct, rng);
        DemandTick {
            requested,
            target: clamp_target(requested, self.pool_capacity),
        }
    }

    pub fn next_target<R: Rng>(&mut self, elapsed: Duration, rng: &mut R) -> usize {
        self.next_tick(elapsed, rng).target
    }
}

/// Add a uniform perturbation in `[-delta, +delta]`, `delta = round(target * pct / 100)`.
///
/// Zero targets and zero percentages pass through unchanged. Targets beyond
/// `i64::MAX` saturate.
pub fn apply_jitter<R: Rng>(target: usize, jitter_pct: u32, rng: &mut R) -> i64 {
    let target = i64::try_from(target).unwrap_or(i64::MAX);
    if jitter_pct == 0 || target == 0 {
        return target;
    }
    let delta = (target as f64 * jitter_pct as f64 / 100.0).round() as i64;
    if delta == 0 {
        return target;
    }
    target.saturating_add(rng.gen_range(-delta..=delta))
}

/// Clamp into `[0, pool_capacity]`.
pub fn clamp_target(requested: i64, pool_capacity: usize) -> usize {
    let max = i64::try_from(pool_capacity).unwrap_or(i64::MAX);
    requested.clamp(0, max) as usize
}

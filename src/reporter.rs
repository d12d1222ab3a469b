//! Time-series report rows and the final summary.
//!
//! The report is a line-oriented text stream: a commented header, one
//! comma-separated row per second, a final row computed from cumulative
//! rates, and a labeled `SUMMARY` block.

use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::info;

use crate::percentiles::PercentileSnapshot;
use crate::stats::RunState;

/// Write the commented header describing the row schema.
pub fn write_header<W: Write>(out: &mut W, sla_ms: u64) -> io::Result<()> {
    writeln!(
        out,
        "# time(s), active_conns, rps, goodput_rps(sla<={}ms), p50_ms, p95_ms, p99_ms",
        sla_ms
    )
}

/// One per-second row built from drained window counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportRow {
    pub elapsed_s: f64,
    pub active: usize,
    pub requests: u64,
    pub good: u64,
    pub latency: PercentileSnapshot,
}

impl ReportRow {
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(
            out,
            "{:.0}, {}, {}, {}, {:.2}, {:.2}, {:.2}",
            self.elapsed_s,
            self.active,
            self.requests,
            self.good,
            self.latency.p50_ms,
            self.latency.p95_ms,
            self.latency.p99_ms
        )
    }
}

/// The last row of the time series, using whole-run rates and percentiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalRow {
    pub elapsed_s: f64,
    pub active: usize,
    pub rps: f64,
    pub goodput_rps: f64,
    pub latency: PercentileSnapshot,
}

impl FinalRow {
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(
            out,
            "{:.0}, {}, {:.1}, {:.1}, {:.2}, {:.2}, {:.2}",
            self.elapsed_s,
            self.active,
            self.rps,
            self.goodput_rps,
            self.latency.p50_ms,
            self.latency.p95_ms,
            self.latency.p99_ms
        )
    }
}

/// Final accounting for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub duration_s: f64,
    pub total_requests: u64,
    pub total_good: u64,
    pub avg_rps: f64,
    pub avg_goodput_rps: f64,
    pub goodput_ratio: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl Summary {
    pub fn new(
        elapsed: Duration,
        total_requests: u64,
        total_good: u64,
        latency: PercentileSnapshot,
    ) -> Self {
        let duration_s = elapsed.as_secs_f64();
        let rate = |count: u64| {
            if duration_s > 0.0 {
                count as f64 / duration_s
            } else {
                0.0
            }
        };
        let goodput_ratio = if total_requests > 0 {
            total_good as f64 / total_requests as f64
        } else {
            0.0
        };

        Self {
            duration_s,
            total_requests,
            total_good,
            avg_rps: rate(total_requests),
            avg_goodput_rps: rate(total_good),
            goodput_ratio,
            p50_ms: latency.p50_ms,
            p95_ms: latency.p95_ms,
            p99_ms: latency.p99_ms,
        }
    }

    pub fn latency(&self) -> PercentileSnapshot {
        PercentileSnapshot {
            p50_ms: self.p50_ms,
            p95_ms: self.p95_ms,
            p99_ms: self.p99_ms,
        }
    }

    /// The labeled summary block, preceded by a blank line.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "SUMMARY")?;
        writeln!(out, "duration_s: {:.0}", self.duration_s)?;
        writeln!(out, "total_requests: {}", self.total_requests)?;
        writeln!(out, "total_good: {}", self.total_good)?;
        writeln!(out, "avg_rps: {:.2}", self.avg_rps)?;
        writeln!(out, "avg_goodput_rps: {:.2}", self.avg_goodput_rps)?;
        writeln!(out, "goodput_ratio: {:.4}", self.goodput_ratio)
    }

    /// Write the summary as pretty-printed JSON.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json + "\n")?;
        info!(path = %path.as_ref().display(), "Summary written as JSON");
        Ok(())
    }
}

/// Drains the shared run state once per tick and writes rows to a sink.
pub struct Reporter<W: Write> {
    out: W,
    state: Arc<RunState>,
    start: Instant,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, state: Arc<RunState>, start: Instant) -> Self {
        Self { out, state, start }
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        write_header(&mut self.out, self.state.sla_us() / 1000)?;
        self.out.flush()
    }

    /// Swap the window counters to zero, drain the window latencies and
    /// write one row.
    pub fn tick(&mut self) -> io::Result<ReportRow> {
        let counts = self.state.counters.drain_window();
        let latency = self.state.window_latency.drain_snapshot();
        let row = ReportRow {
            elapsed_s: self.start.elapsed().as_secs_f64(),
            active: self.state.active.get(),
            requests: counts.requests,
            good: counts.good,
            latency,
        };
        row.write_to(&mut self.out)?;
        self.out.flush()?;
        Ok(row)
    }

    /// Write the final row and the summary block.
    ///
    /// Callers must have stopped every writer to the run state first.
    pub fn finish(&mut self, elapsed: Duration) -> io::Result<Summary> {
        let summary = Summary::new(
            elapsed,
            self.state.counters.total_requests(),
            self.state.counters.total_good(),
            self.state.total_latency.snapshot(),
        );

        FinalRow {
            elapsed_s: summary.duration_s,
            active: self.state.active.get(),
            rps: summary.avg_rps,
            goodput_rps: summary.avg_goodput_rps,
            latency: summary.latency(),
        }
        .write_to(&mut self.out)?;
        summary.write_to(&mut self.out)?;
        self.out.flush()?;

        Ok(summary)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn header_names_sla() {
        let mut buf = Vec::new();
        write_header(&mut buf, 50).unwrap();
        assert_eq!(
            text(buf),
            "# time(s), active_conns, rps, goodput_rps(sla<=50ms), p50_ms, p95_ms, p99_ms\n"
        );
    }

    #[test]
    fn row_formatting() {
        let mut buf = Vec::new();
        ReportRow {
            elapsed_s: 3.0004,
            active: 128,
            requests: 900,
            good: 850,
            latency: PercentileSnapshot {
                p50_ms: 1.234,
                p95_ms: 9.5,
                p99_ms: 20.0,
            },
        }
        .write_to(&mut buf)
        .unwrap();
        assert_eq!(text(buf), "3, 128, 900, 850, 1.23, 9.50, 20.00\n");
    }

    #[test]
    fn final_row_uses_rates() {
        let mut buf = Vec::new();
        FinalRow {
            elapsed_s: 10.0,
            active: 4,
            rps: 123.45,
            goodput_rps: 100.0,
            latency: PercentileSnapshot::default(),
        }
        .write_to(&mut buf)
        .unwrap();
        assert_eq!(text(buf), "10, 4, 123.5, 100.0, 0.00, 0.00, 0.00\n");
    }

    #[test]
    fn summary_goodput_ratio() {
        let summary = Summary::new(
            Duration::from_secs(2),
            4,
            2,
            PercentileSnapshot::default(),
        );
        assert_eq!(summary.goodput_ratio, 0.5);
        assert_eq!(summary.avg_rps, 2.0);
        assert_eq!(summary.avg_goodput_rps, 1.0);

        let mut buf = Vec::new();
        summary.write_to(&mut buf).unwrap();
        assert_eq!(
            text(buf),
            "\nSUMMARY\nduration_s: 2\ntotal_requests: 4\ntotal_good: 2\n\
             avg_rps: 2.00\navg_goodput_rps: 1.00\ngoodput_ratio: 0.5000\n"
        );
    }

    #[test]
    fn summary_with_no_requests() {
        let summary = Summary::new(Duration::ZERO, 0, 0, PercentileSnapshot::default());
        assert_eq!(summary.goodput_ratio, 0.0);
        assert_eq!(summary.avg_rps, 0.0);
        assert!(summary.avg_goodput_rps.is_finite());
    }

    #[test]
    fn tick_drains_window_but_keeps_totals() {
        let state = Arc::new(RunState::new(10, 50));
        state.active.publish(3);
        state.record_outcome(Some(200), 10_000);
        state.record_outcome(Some(500), 20_000);

        let mut reporter = Reporter::new(Vec::new(), state.clone(), Instant::now());
        let row = reporter.tick().unwrap();
        assert_eq!(row.active, 3);
        assert_eq!(row.requests, 2);
        assert_eq!(row.good, 1);
        assert_eq!(row.latency.p50_ms, 10.0);
        assert_eq!(row.latency.p99_ms, 20.0);

        let row = reporter.tick().unwrap();
        assert_eq!(row.requests, 0);
        assert_eq!(row.latency, PercentileSnapshot::default());

        let summary = reporter.finish(Duration::from_secs(1)).unwrap();
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.total_good, 1);
        assert!((summary.p99_ms - 20.0).abs() < 0.1);

        let out = text(reporter.into_inner());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 11);
        // Cumulative percentiles come from the histogram, so only check rates.
        assert!(lines[2].starts_with("1, 3, 2.0, 1.0, "), "{}", lines[2]);
        assert_eq!(lines[4], "SUMMARY");
    }

    #[test]
    fn summary_json_round_trips_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = Summary::new(
            Duration::from_secs(4),
            8,
            6,
            PercentileSnapshot {
                p50_ms: 1.0,
                p95_ms: 2.0,
                p99_ms: 3.0,
            },
        );
        summary.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["total_requests"], 8);
        assert_eq!(value["goodput_ratio"], 0.75);
        assert_eq!(value["p99_ms"], 3.0);
    }
}

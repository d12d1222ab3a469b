use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use closedloop_loadtest::client::{ReqwestTransport, Transport};
use closedloop_loadtest::config::Config;
use closedloop_loadtest::logging::init_logging;
use closedloop_loadtest::metrics::{start_metrics_server, LoadMetrics};
use closedloop_loadtest::runner::run_load_test;
use tracing::{error, info};

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!("  TARGET_URL              - The URL to load test (must start with http:// or https://)");
    eprintln!();
    eprintln!("Request options:");
    eprintln!("  REQUEST_METHOD          - HTTP method (default: GET)");
    eprintln!("  REQUEST_BODY            - Body for POST/PUT/PATCH/DELETE requests");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout: 500ms, 3s (default: 3s)");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated Key:Value headers (use \\, for literal commas)");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: true)");
    eprintln!();
    eprintln!("Run options:");
    eprintln!("  TEST_DURATION           - Total run duration: 30s, 10m, 1h30m (default: 5m)");
    eprintln!("  SLA_MS                  - Goodput latency threshold in ms (default: 50)");
    eprintln!("  MAX_POOL                - Worker pool capacity (default: 8192, must be > 0)");
    eprintln!("  MAX_CPU                 - Runtime worker threads, 0 = all cores (default: 0)");
    eprintln!("  THINK_MEAN_MS           - Mean exponential think time in ms, 0 = off (default: 0)");
    eprintln!();
    eprintln!("Demand profile (precedence: TRACE_FILE > PHASES > SINE > built-in):");
    eprintln!("  TRACE_FILE              - CSV of second,concurrency rows");
    eprintln!("  PHASES                  - DUR@CONNS list, e.g. 30s@128,1m30s@1024");
    eprintln!("  PHASE_LOOPS             - Additional repeats of PHASES (default: 0)");
    eprintln!("  SINE                    - period=60s,low=64,high=2048");
    eprintln!();
    eprintln!("Durations are one or more <number><unit> parts (ns, us, ms, s, m, h, d),");
    eprintln!("e.g. 500ms, 1.5s, 1m30s.");
    eprintln!("  JITTER_PCT              - Concurrency jitter percentage, 0-50 (default: 0)");
    eprintln!();
    eprintln!("Output and observability:");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: closedloop)");
    eprintln!("  SUMMARY_JSON            - Also write the final summary as JSON to this path");
    eprintln!("  CONFIG_FILE             - YAML file with the same options (env vars take precedence)");
    eprintln!("  RUST_LOG, LOG_FORMAT    - Log filter and format (text or json); logs go to stderr");
}

fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            return ExitCode::from(2);
        }
    };

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.max_cpu > 0 {
        builder.worker_threads(config.max_cpu);
    }
    let runtime = match builder.build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunFailure::Setup(e)) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            ExitCode::from(2)
        }
        Err(RunFailure::Output(e)) => {
            error!(error = %e, "Failed to write report");
            ExitCode::FAILURE
        }
    }
}

enum RunFailure {
    Setup(String),
    Output(io::Error),
}

async fn run(config: Config) -> Result<(), RunFailure> {
    config.print_summary();

    let transport: Arc<dyn Transport> = Arc::new(
        ReqwestTransport::from_config(&config.to_client_config())
            .map_err(|e| RunFailure::Setup(e.to_string()))?,
    );

    let metrics = match config.metrics_port {
        Some(port) => {
            let metrics = Arc::new(
                LoadMetrics::new(&config.metric_namespace)
                    .map_err(|e| RunFailure::Setup(e.to_string()))?,
            );
            tokio::spawn(start_metrics_server(port, metrics.clone()));
            Some(metrics)
        }
        None => None,
    };

    let stdout = io::stdout();
    let summary = run_load_test(
        &config,
        config.demand_profile(),
        transport,
        metrics,
        stdout.lock(),
    )
    .await
    .map_err(RunFailure::Output)?;

    if let Some(path) = &config.summary_json {
        summary.write_json(path).map_err(RunFailure::Output)?;
    }

    info!("Load test complete");
    Ok(())
}

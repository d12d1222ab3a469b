//! Integration tests for configuration loading from the environment and a
//! YAML file, with precedence env > yaml > defaults.

use closedloop_loadtest::config::{Config, ConfigError};
use closedloop_loadtest::demand::DemandSource;
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;

/// Clear all env vars that could affect config parsing.
/// Must be called at the start of every test; execution order is not guaranteed.
fn clean_env() {
    for var in [
        "CONFIG_FILE",
        "TARGET_URL",
        "REQUEST_METHOD",
        "REQUEST_BODY",
        "REQUEST_TIMEOUT",
        "TEST_DURATION",
        "SLA_MS",
        "SKIP_TLS_VERIFY",
        "MAX_CPU",
        "MAX_POOL",
        "PHASES",
        "PHASE_LOOPS",
        "SINE",
        "TRACE_FILE",
        "JITTER_PCT",
        "THINK_MEAN_MS",
        "CUSTOM_HEADERS",
        "METRICS_PORT",
        "METRIC_NAMESPACE",
        "SUMMARY_JSON",
    ] {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_env_only_configuration() {
    clean_env();
    env::set_var("TARGET_URL", "http://localhost:8080/api?x=1");
    env::set_var("REQUEST_METHOD", "put");
    env::set_var("REQUEST_BODY", "{\"a\":1}");
    env::set_var("TEST_DURATION", "90s");
    env::set_var("SLA_MS", "120");
    env::set_var("SKIP_TLS_VERIFY", "false");
    env::set_var("MAX_POOL", "64");
    env::set_var("THINK_MEAN_MS", "15");
    env::set_var("METRICS_PORT", "9100");

    let config = Config::from_env().expect("config loads");
    assert_eq!(config.request.url, "http://localhost:8080/api?x=1");
    assert_eq!(config.request.method.as_str(), "PUT");
    assert_eq!(config.request.body.as_deref(), Some("{\"a\":1}"));
    assert_eq!(config.test_duration, Duration::from_secs(90));
    assert_eq!(config.sla_ms, 120);
    assert!(!config.skip_tls_verify);
    assert_eq!(config.max_pool, 64);
    assert_eq!(config.think_mean_ms, 15);
    assert_eq!(config.metrics_port, Some(9100));

    clean_env();
}

#[test]
#[serial]
fn test_missing_target_url() {
    clean_env();
    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::MissingTarget));
    assert!(err.to_string().contains("TARGET_URL"));
}

#[test]
#[serial]
fn test_rejects_non_http_target() {
    clean_env();
    env::set_var("TARGET_URL", "localhost:8080");
    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidTarget(_)));
    clean_env();
}

#[test]
#[serial]
fn test_yaml_file_with_env_override() {
    clean_env();
    let dir = tempfile::tempdir().unwrap();
    let yaml_path = dir.path().join("load.yaml");
    fs::write(
        &yaml_path,
        r#"
target: "http://yaml.example.com"
duration: 10m
slaMs: 75
maxPool: 512
phases: "10s@8,20s@16"
phaseLoops: 2
headers:
  - "X-From: yaml"
"#,
    )
    .unwrap();

    env::set_var("CONFIG_FILE", yaml_path.to_str().unwrap());
    env::set_var("SLA_MS", "30");

    let config = Config::from_env().expect("config loads");
    assert_eq!(config.request.url, "http://yaml.example.com");
    assert_eq!(config.test_duration, Duration::from_secs(600));
    assert_eq!(config.sla_ms, 30, "env should win over yaml");
    assert_eq!(config.max_pool, 512);
    assert_eq!(config.request.headers["x-from"], "yaml");
    match &config.demand {
        DemandSource::Phases { phases, loops } => {
            assert_eq!(phases.len(), 2);
            assert_eq!(*loops, 2);
        }
        other => panic!("expected phases, got {:?}", other),
    }

    clean_env();
}

#[test]
#[serial]
fn test_unknown_yaml_key_is_fatal() {
    clean_env();
    let dir = tempfile::tempdir().unwrap();
    let yaml_path = dir.path().join("bad.yaml");
    fs::write(&yaml_path, "target: http://x\nconcurrency: 10\n").unwrap();
    env::set_var("CONFIG_FILE", yaml_path.to_str().unwrap());

    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Yaml(_)));
    clean_env();
}

#[test]
#[serial]
fn test_trace_file_overrides_phases_and_sine() {
    clean_env();
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");
    fs::write(&trace_path, "second,concurrency\n0,5\n1,10\n2,15\n").unwrap();

    env::set_var("TARGET_URL", "http://localhost");
    env::set_var("TRACE_FILE", trace_path.to_str().unwrap());
    env::set_var("PHASES", "10s@100");
    env::set_var("SINE", "period=10s,low=0,high=100");

    let config = Config::from_env().expect("config loads");
    assert_eq!(config.demand, DemandSource::Trace(vec![5, 10, 15]));
    clean_env();
}

#[test]
#[serial]
fn test_malformed_trace_reports_line() {
    clean_env();
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");
    fs::write(&trace_path, "0,5\n1,lots\n").unwrap();

    env::set_var("TARGET_URL", "http://localhost");
    env::set_var("TRACE_FILE", trace_path.to_str().unwrap());

    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Trace(_)));
    assert!(
        err.to_string().contains("line 2"),
        "message was: {}",
        err
    );
    clean_env();
}

#[test]
#[serial]
fn test_jitter_above_maximum_is_clamped() {
    clean_env();
    env::set_var("TARGET_URL", "http://localhost");
    env::set_var("JITTER_PCT", "75");

    let config = Config::from_env().expect("config loads");
    assert_eq!(config.jitter_pct, 50);
    clean_env();
}

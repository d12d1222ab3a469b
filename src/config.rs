use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::client::{ClientConfig, ClientError, RequestSpec};
use crate::connection_pool::PoolConfig;
use crate::demand::{
    parse_phases, DemandError, DemandProfile, DemandSource, SineSpec, MAX_JITTER_PCT,
};
use crate::trace::{load_trace, TraceError};
use crate::utils::{parse_duration_string, parse_headers_with_escapes, split_header_pair};
use crate::yaml_config::{YamlConfig, YamlConfigError, YamlDuration};

pub const DEFAULT_METHOD: &str = "GET";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_DURATION: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SLA_MS: u64 = 50;
pub const DEFAULT_SKIP_TLS_VERIFY: bool = true;
pub const DEFAULT_MAX_POOL: usize = 8192;
pub const DEFAULT_METRIC_NAMESPACE: &str = "closedloop";

/// Errors that stop the run before it starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("TARGET_URL environment variable (or 'target' in the config file) must be set")]
    MissingTarget,

    #[error("Invalid target URL '{0}': must start with http:// or https://")]
    InvalidTarget(String),

    #[error("Invalid {var} value: '{value}'. {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid {var} format: '{value}'. {reason}")]
    InvalidDuration {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than 0")]
    NotPositive(&'static str),

    #[error("Invalid header '{0}': expected Key:Value")]
    InvalidHeader(String),

    #[error("Invalid demand profile: {0}")]
    Demand(#[from] DemandError),

    #[error("Failed to load trace: {0}")]
    Trace(#[from] TraceError),

    #[error("Config file error: {0}")]
    Yaml(#[from] YamlConfigError),

    #[error("Invalid request: {0}")]
    Request(#[from] ClientError),
}

/// Main configuration for the load test.
#[derive(Debug, Clone)]
pub struct Config {
    /// The request every worker sends.
    pub request: RequestSpec,
    pub request_timeout: Duration,
    pub test_duration: Duration,
    pub sla_ms: u64,
    pub skip_tls_verify: bool,
    /// Runtime worker-thread cap; 0 means one per core.
    pub max_cpu: usize,
    /// Number of workers spawned for the run.
    pub max_pool: usize,
    pub demand: DemandSource,
    pub jitter_pct: u32,
    pub think_mean_ms: u64,
    pub metrics_port: Option<u16>,
    pub metric_namespace: String,
    pub summary_json: Option<PathBuf>,
}

impl Config {
    /// Configuration with every option at its default.
    pub fn new(request: RequestSpec) -> Self {
        Self {
            request,
            request_timeout: DEFAULT_TIMEOUT,
            test_duration: DEFAULT_DURATION,
            sla_ms: DEFAULT_SLA_MS,
            skip_tls_verify: DEFAULT_SKIP_TLS_VERIFY,
            max_cpu: 0,
            max_pool: DEFAULT_MAX_POOL,
            demand: DemandSource::Default,
            jitter_pct: 0,
            think_mean_ms: 0,
            metrics_port: None,
            metric_namespace: DEFAULT_METRIC_NAMESPACE.to_string(),
            summary_json: None,
        }
    }

    /// Loads configuration from environment variables, layered over the YAML
    /// file named by `CONFIG_FILE` when it is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let yaml = match env::var("CONFIG_FILE") {
            Ok(path) if !path.trim().is_empty() => {
                info!(path = %path, "Loading config file");
                YamlConfig::from_file(path.trim())?
            }
            _ => YamlConfig::default(),
        };
        Self::from_sources(&yaml, |key| env::var(key).ok())
    }

    /// Merge with precedence: environment > YAML > defaults.
    ///
    /// `lookup` returns the raw environment value for a variable name. Blank
    /// values count as unset.
    pub fn from_sources<F>(yaml: &YamlConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let target = var("TARGET_URL")
            .or_else(|| yaml.target.clone())
            .ok_or(ConfigError::MissingTarget)?;
        if !target.starts_with("http://") && !target.starts_with("https://") {
            return Err(ConfigError::InvalidTarget(target));
        }

        let method = var("REQUEST_METHOD")
            .or_else(|| yaml.method.clone())
            .unwrap_or_else(|| DEFAULT_METHOD.to_string());
        let body = var("REQUEST_BODY").or_else(|| yaml.body.clone());

        let header_lines = match var("CUSTOM_HEADERS") {
            Some(raw) => parse_headers_with_escapes(&raw),
            None => yaml.headers.clone().unwrap_or_default(),
        };
        let headers = header_lines
            .iter()
            .map(|line| {
                split_header_pair(line).ok_or_else(|| ConfigError::InvalidHeader(line.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let request = RequestSpec::new(&method, &target, body.as_deref(), &headers)?;

        let request_timeout = merge_duration(
            "REQUEST_TIMEOUT",
            var("REQUEST_TIMEOUT"),
            yaml.timeout.as_ref(),
            DEFAULT_TIMEOUT,
        )?;
        if request_timeout.is_zero() {
            return Err(ConfigError::NotPositive("REQUEST_TIMEOUT"));
        }
        let test_duration = merge_duration(
            "TEST_DURATION",
            var("TEST_DURATION"),
            yaml.duration.as_ref(),
            DEFAULT_DURATION,
        )?;
        if std::time::Instant::now().checked_add(test_duration).is_none() {
            return Err(ConfigError::InvalidDuration {
                var: "TEST_DURATION",
                value: format!("{:?}", test_duration),
                reason: "Duration is too large to schedule".to_string(),
            });
        }

        let sla_ms = merge_parsed("SLA_MS", var("SLA_MS"), yaml.sla_ms, DEFAULT_SLA_MS)?;
        let skip_tls_verify = merge_bool(
            "SKIP_TLS_VERIFY",
            var("SKIP_TLS_VERIFY"),
            yaml.skip_tls_verify,
            DEFAULT_SKIP_TLS_VERIFY,
        )?;
        let max_cpu = merge_parsed("MAX_CPU", var("MAX_CPU"), yaml.max_cpu, 0)?;
        let max_pool = merge_parsed("MAX_POOL", var("MAX_POOL"), yaml.max_pool, DEFAULT_MAX_POOL)?;
        if max_pool == 0 {
            return Err(ConfigError::NotPositive("MAX_POOL"));
        }

        let requested_jitter = merge_parsed("JITTER_PCT", var("JITTER_PCT"), yaml.jitter_pct, 0)?;
        let jitter_pct = if requested_jitter > MAX_JITTER_PCT {
            warn!(
                requested = requested_jitter,
                max = MAX_JITTER_PCT,
                "JITTER_PCT above maximum, clamping"
            );
            MAX_JITTER_PCT
        } else {
            requested_jitter
        };

        let think_mean_ms =
            merge_parsed("THINK_MEAN_MS", var("THINK_MEAN_MS"), yaml.think_mean_ms, 0)?;

        let metrics_port = match var("METRICS_PORT") {
            Some(raw) => Some(parse_value("METRICS_PORT", &raw)?),
            None => yaml.metrics_port,
        };
        let metric_namespace = var("METRIC_NAMESPACE")
            .or_else(|| yaml.metric_namespace.clone())
            .unwrap_or_else(|| DEFAULT_METRIC_NAMESPACE.to_string());
        let summary_json = var("SUMMARY_JSON")
            .or_else(|| yaml.summary_json.clone())
            .map(PathBuf::from);

        let demand = resolve_demand(
            var("TRACE_FILE").or_else(|| yaml.trace_file.clone()),
            var("PHASES").or_else(|| yaml.phases.clone()),
            merge_parsed("PHASE_LOOPS", var("PHASE_LOOPS"), yaml.phase_loops, 0)?,
            var("SINE").or_else(|| yaml.sine.clone()),
        )?;

        Ok(Config {
            request,
            request_timeout,
            test_duration,
            sla_ms,
            skip_tls_verify,
            max_cpu,
            max_pool,
            demand,
            jitter_pct,
            think_mean_ms,
            metrics_port,
            metric_namespace,
            summary_json,
        })
    }

    /// Build the demand profile for one run.
    pub fn demand_profile(&self) -> DemandProfile {
        DemandProfile::new(self.demand.clone(), self.jitter_pct, self.max_pool)
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            pool_config: PoolConfig::sized_for(self.max_pool),
        }
    }

    /// Logs the effective configuration.
    pub fn print_summary(&self) {
        info!(
            target_url = %self.request.url,
            method = %self.request.method,
            has_body = self.request.body.is_some(),
            request_timeout = ?self.request_timeout,
            test_duration = ?self.test_duration,
            sla_ms = self.sla_ms,
            skip_tls_verify = self.skip_tls_verify,
            max_cpu = self.max_cpu,
            max_pool = self.max_pool,
            demand_source = self.demand.kind(),
            jitter_pct = self.jitter_pct,
            think_mean_ms = self.think_mean_ms,
            "Load test configuration"
        );

        for (name, value) in self.request.headers.iter() {
            info!(
                header = %name,
                value = value.to_str().unwrap_or("<non-ASCII value>"),
                "Custom header"
            );
        }

        match &self.demand {
            DemandSource::Trace(values) => info!(seconds = values.len(), "Demand from trace"),
            DemandSource::Phases { phases, loops } => {
                info!(phases = phases.len(), loops = loops, "Demand from phase list")
            }
            DemandSource::Sine(spec) => info!(
                period = ?spec.period,
                low = spec.low,
                high = spec.high,
                "Demand from sine"
            ),
            DemandSource::Default => info!("Demand from built-in phase list"),
        }
    }
}

/// Parse every demand input, then pick the authoritative one.
///
/// All inputs are validated even when a higher-precedence one wins, so a
/// malformed string is never silently ignored.
fn resolve_demand(
    trace_file: Option<String>,
    phases: Option<String>,
    phase_loops: u32,
    sine: Option<String>,
) -> Result<DemandSource, ConfigError> {
    let trace = trace_file.map(|path| load_trace(path.trim())).transpose()?;
    let phases = phases.as_deref().map(parse_phases).transpose()?.unwrap_or_default();
    let sine = match sine.as_deref() {
        Some(raw) => SineSpec::parse(raw)?,
        None => None,
    };

    if trace.is_some() && (!phases.is_empty() || sine.is_some()) {
        warn!("TRACE_FILE overrides PHASES and SINE");
    } else if !phases.is_empty() && sine.is_some() {
        warn!("PHASES overrides SINE");
    }

    Ok(DemandSource::select(trace, phases, phase_loops, sine))
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn merge_parsed<T>(
    var: &'static str,
    env_value: Option<String>,
    yaml_value: Option<T>,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env_value {
        Some(raw) => parse_value(var, &raw),
        None => Ok(yaml_value.unwrap_or(default)),
    }
}

fn merge_bool(
    var: &'static str,
    env_value: Option<String>,
    yaml_value: Option<bool>,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = env_value else {
        return Ok(yaml_value.unwrap_or(default));
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw,
            reason: "Expected true or false".to_string(),
        }),
    }
}

fn merge_duration(
    var: &'static str,
    env_value: Option<String>,
    yaml_value: Option<&YamlDuration>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    if let Some(raw) = env_value {
        return parse_duration_string(&raw).map_err(|reason| ConfigError::InvalidDuration {
            var,
            value: raw,
            reason,
        });
    }
    match yaml_value {
        Some(value) => Ok(value.to_std_duration()?),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn load(yaml: &YamlConfig, pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env = env_of(pairs);
        Config::from_sources(yaml, |k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&YamlConfig::default(), &[("TARGET_URL", "http://localhost")]).unwrap();
        assert_eq!(config.request.method, reqwest::Method::GET);
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.test_duration, Duration::from_secs(300));
        assert_eq!(config.sla_ms, 50);
        assert!(config.skip_tls_verify);
        assert_eq!(config.max_cpu, 0);
        assert_eq!(config.max_pool, 8192);
        assert_eq!(config.demand, DemandSource::Default);
        assert_eq!(config.jitter_pct, 0);
        assert_eq!(config.metric_namespace, "closedloop");
        assert!(config.metrics_port.is_none());
    }

    #[test]
    fn missing_target_is_fatal() {
        let err = load(&YamlConfig::default(), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTarget));

        let blank = load(&YamlConfig::default(), &[("TARGET_URL", "  ")]).unwrap_err();
        assert!(matches!(blank, ConfigError::MissingTarget));
    }

    #[test]
    fn env_overrides_yaml() {
        let yaml = YamlConfig {
            target: Some("http://yaml-host".to_string()),
            sla_ms: Some(100),
            max_pool: Some(16),
            timeout: Some(YamlDuration::String("1s".to_string())),
            ..Default::default()
        };
        let config = load(&yaml, &[("SLA_MS", "20"), ("REQUEST_TIMEOUT", "250ms")]).unwrap();
        assert_eq!(config.request.url, "http://yaml-host");
        assert_eq!(config.sla_ms, 20);
        assert_eq!(config.max_pool, 16);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn jitter_is_clamped() {
        let config = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("JITTER_PCT", "80")],
        )
        .unwrap();
        assert_eq!(config.jitter_pct, 50);
    }

    #[test]
    fn invalid_numbers_and_durations() {
        let err = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("MAX_POOL", "lots")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("MAX_POOL"));

        let err = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("TEST_DURATION", "5x")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));

        let err = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("MAX_POOL", "0")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NotPositive("MAX_POOL")));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let err = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("TEST_DURATION", "300000000000000d")],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration {
                var: "TEST_DURATION",
                ..
            }
        ));
        assert!(err.to_string().contains("too large"), "message was: {}", err);

        let err = load(
            &YamlConfig::default(),
            &[
                ("TARGET_URL", "http://x"),
                ("TEST_DURATION", "18446744073709551615s"),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("too large to schedule"), "message was: {}", err);

        let err = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("PHASES", "300000000000000d@10")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Demand(_)));
    }

    #[test]
    fn compound_durations_are_accepted() {
        let config = load(
            &YamlConfig::default(),
            &[
                ("TARGET_URL", "http://x"),
                ("TEST_DURATION", "1m30s"),
                ("REQUEST_TIMEOUT", "1.5s"),
            ],
        )
        .unwrap();
        assert_eq!(config.test_duration, Duration::from_secs(90));
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn demand_precedence() {
        let base = [("TARGET_URL", "http://x")];

        let sine_only = load(
            &YamlConfig::default(),
            &[base[0], ("SINE", "period=10s,low=0,high=100")],
        )
        .unwrap();
        assert!(matches!(sine_only.demand, DemandSource::Sine(_)));

        let phases_win = load(
            &YamlConfig::default(),
            &[
                base[0],
                ("SINE", "period=10s,low=0,high=100"),
                ("PHASES", "2s@10,3s@20"),
                ("PHASE_LOOPS", "1"),
            ],
        )
        .unwrap();
        assert_eq!(
            phases_win.demand,
            DemandSource::Phases {
                phases: parse_phases("2s@10,3s@20").unwrap(),
                loops: 1
            }
        );
    }

    #[test]
    fn malformed_demand_inputs_are_fatal() {
        let err = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("PHASES", "10s128")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Demand(_)));

        let err = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("SINE", "period=10s,low=5,high=5")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Demand(_)));

        let err = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("TRACE_FILE", "/no/such/trace.csv")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Trace(_)));
    }

    #[test]
    fn headers_from_env_with_escapes() {
        let config = load(
            &YamlConfig::default(),
            &[
                ("TARGET_URL", "http://x"),
                ("CUSTOM_HEADERS", "X-A:1,Keep-Alive:timeout=5\\,max=200"),
            ],
        )
        .unwrap();
        assert_eq!(config.request.headers["x-a"], "1");
        assert_eq!(config.request.headers["keep-alive"], "timeout=5,max=200");

        let err = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("CUSTOM_HEADERS", "no-colon")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader(_)));
    }

    #[test]
    fn body_only_kept_for_post() {
        let config = load(
            &YamlConfig::default(),
            &[
                ("TARGET_URL", "http://x"),
                ("REQUEST_METHOD", "post"),
                ("REQUEST_BODY", "{}"),
            ],
        )
        .unwrap();
        assert_eq!(config.request.method, reqwest::Method::POST);
        assert_eq!(config.request.body.as_deref(), Some("{}"));
    }

    #[test]
    fn client_config_pool_covers_workers() {
        let config = load(
            &YamlConfig::default(),
            &[("TARGET_URL", "http://x"), ("MAX_POOL", "20000")],
        )
        .unwrap();
        let client = config.to_client_config();
        assert_eq!(client.pool_config.max_idle_per_host, 20000);
        assert!(client.skip_tls_verify);
        assert_eq!(config.demand_profile().pool_capacity(), 20000);
    }
}

//! YAML configuration file support.
//!
//! A YAML file is an alternative to environment variables for every option.
//! Environment variables still win when both are set. Keys are camelCase and
//! unknown keys are rejected so typos fail loudly.
//!
//! ```yaml
//! target: https://api.example.com/health
//! method: GET
//! timeout: 3s
//! duration: 10m
//! slaMs: 50
//! phases: "30s@128,10s@1024,30s@256"
//! phaseLoops: 2
//! jitterPct: 10
//! headers:
//!   - "Authorization: Bearer token"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;
use thiserror::Error;

/// Errors that can occur when loading or parsing YAML configuration.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Duration format for YAML: plain seconds or a suffixed string ("30s", "5m").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s).map_err(|e| {
                YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e))
            }),
        }
    }
}

/// Root YAML configuration. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct YamlConfig {
    pub target: Option<String>,
    pub method: Option<String>,
    pub body: Option<String>,
    pub timeout: Option<YamlDuration>,
    pub duration: Option<YamlDuration>,
    pub sla_ms: Option<u64>,
    pub skip_tls_verify: Option<bool>,
    pub max_cpu: Option<usize>,
    pub max_pool: Option<usize>,
    pub phases: Option<String>,
    pub phase_loops: Option<u32>,
    pub sine: Option<String>,
    pub trace_file: Option<String>,
    pub jitter_pct: Option<u32>,
    pub think_mean_ms: Option<u64>,
    /// `Key: Value` strings, applied in order.
    pub headers: Option<Vec<String>>,
    pub metrics_port: Option<u16>,
    pub metric_namespace: Option<String>,
    pub summary_json: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, YamlConfigError> {
        let config: YamlConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), YamlConfigError> {
        if let Some(target) = &self.target {
            if !target.starts_with("http://") && !target.starts_with("https://") {
                return Err(YamlConfigError::Validation(format!(
                    "target must start with http:// or https://, got: '{}'",
                    target
                )));
            }
        }

        if self.max_pool == Some(0) {
            return Err(YamlConfigError::Validation(
                "maxPool must be greater than 0".to_string(),
            ));
        }

        if let Some(timeout) = &self.timeout {
            if timeout.to_std_duration()?.is_zero() {
                return Err(YamlConfigError::Validation(
                    "timeout must be greater than 0".to_string(),
                ));
            }
        }

        if let Some(duration) = &self.duration {
            duration.to_std_duration()?;
        }

        Ok(())
    }
}

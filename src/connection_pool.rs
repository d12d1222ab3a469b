//! Connection pool configuration for the shared HTTP client.
//!
//! All workers share one `reqwest::Client`, so the pool has to be sized for
//! the whole worker pool: with keep-alive every active worker holds one idle
//! connection between requests.

use std::time::Duration;

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections to keep per host
    pub max_idle_per_host: usize,

    /// How long idle connections stay in the pool before cleanup
    pub idle_timeout: Duration,

    /// TCP keepalive duration
    pub tcp_keepalive: Option<Duration>,

    /// Upper bound on establishing a new TCP connection
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 16384,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl PoolConfig {
    /// Size the idle pool for `workers` concurrent workers, never below the default.
    pub fn sized_for(workers: usize) -> Self {
        let default = Self::default();
        Self {
            max_idle_per_host: default.max_idle_per_host.max(workers),
            ..default
        }
    }

    /// Apply this configuration to a reqwest ClientBuilder.
    pub fn apply_to_builder(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout)
            .connect_timeout(self.connect_timeout);

        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder
    }
}

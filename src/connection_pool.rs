//! Connection pool configuration applied to the shared HTTP transport.

use std::time::Duration;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum idle connections to keep per host
    pub max_idle_per_host: usize,

    /// How long idle connections stay in the pool before cleanup
    pub idle_timeout: Duration,

    /// TCP keepalive duration
    pub tcp_keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 100,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }

    /// Apply this configuration to a reqwest ClientBuilder.
    pub fn apply_to_builder(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout);

        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_idle_per_host, 100);
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.tcp_keepalive, Some(Duration::from_secs(60)));
    }

    #[test]
    fn pool_config_builder_overrides_every_field() {
        let config = PoolConfig::new()
            .with_max_idle_per_host(64)
            .with_idle_timeout(Duration::from_secs(120))
            .with_tcp_keepalive(None);

        assert_eq!(config.max_idle_per_host, 64);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.tcp_keepalive, None);
    }
}

use crate::error::{LimiterError, Result};
use clap::{ArgAction, Args, Parser, ValueEnum};
use humantime_serde::re::humantime::parse_duration;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Service configuration, read from flags or the environment
#[derive(Debug, Clone, Parser, Validate)]
#[command(name = "rate-gate", version, about = "Per-client request admission control")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(flatten)]
    #[validate(nested)]
    pub limiter: LimiterConfig,
}

/// Counter store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Counters live in this process
    #[default]
    Memory,
    /// Counters are shared through Redis
    #[value(alias = "distributed")]
    #[serde(alias = "distributed")]
    Redis,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Args, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LimiterConfig {
    /// Install the admission layer
    #[arg(
        long = "rate-limit-enabled",
        env = "RATE_LIMIT_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub enabled: bool,

    /// Maximum requests per client within one TTL window
    #[arg(long = "rate-limit", env = "RATE_LIMIT", default_value_t = 100)]
    #[validate(range(min = 1, message = "rate must be at least 1"))]
    pub rate: u32,

    /// How long a client's counter lives
    #[arg(long = "rate-limit-ttl", env = "RATE_LIMIT_TTL", default_value = "1s", value_parser = parse_duration)]
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub ttl: Duration,

    #[arg(long = "store-kind", env = "RATE_LIMIT_STORE", value_enum, default_value_t = StoreKind::Memory)]
    pub kind: StoreKind,

    /// Redis URL, or comma-separated seed nodes in cluster mode
    #[arg(long = "redis-addr", env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_addr: String,

    #[arg(
        long = "redis-cluster-mode",
        env = "REDIS_CLUSTER_MODE",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub redis_cluster_mode: bool,

    /// Number of trusted reverse proxies in front of the service
    #[arg(long = "proxy-count", env = "RATE_LIMIT_PROXY_COUNT", default_value_t = 0)]
    pub proxy_count: usize,

    /// Prefix of the counter keys in Redis
    #[arg(long = "key-prefix", env = "RATE_LIMIT_KEY_PREFIX", default_value = "ratelimit:")]
    #[validate(length(min = 1, message = "key prefix cannot be empty"))]
    pub key_prefix: String,

    /// Sweep interval of expired in-memory counters, 0 disables the sweep
    #[arg(long = "cleanup-interval", env = "RATE_LIMIT_CLEANUP_INTERVAL", default_value = "60s", value_parser = parse_duration)]
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Upper bound on one counter store call, 0 disables it
    #[arg(long = "store-timeout", env = "RATE_LIMIT_STORE_TIMEOUT", default_value = "500ms", value_parser = parse_duration)]
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: 100,
            ttl: Duration::from_secs(1),
            kind: StoreKind::Memory,
            redis_addr: "redis://127.0.0.1:6379".to_string(),
            redis_cluster_mode: false,
            proxy_count: 0,
            key_prefix: "ratelimit:".to_string(),
            cleanup_interval: Duration::from_secs(60),
            store_timeout: Duration::from_millis(500),
        }
    }
}

impl LimiterConfig {
    /// Validate field ranges and the backend address.
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        if self.kind == StoreKind::Redis {
            for node in self.redis_addr.split(',') {
                validate_redis_url(node.trim())?;
            }
        }

        Ok(())
    }
}

impl Config {
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        self.limiter.check()
    }
}

fn non_zero_duration(value: &Duration) -> std::result::Result<(), ValidationError> {
    if value.is_zero() {
        let mut err = ValidationError::new("non_zero");
        err.message = Some("duration must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Validates a Redis URL
pub fn validate_redis_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(LimiterError::Config("Redis URL cannot be empty".to_string()));
    }

    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(LimiterError::Config(format!(
            "Redis URL must start with 'redis://' or 'rediss://', got '{}'",
            url
        )));
    }

    Ok(())
}

use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::identity::ClientResolver;
use crate::store::{self, CounterStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Window granularity reported when a store gives no expiry information
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Admission decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Post-increment count of the client in this window
    pub count: u64,
    pub limit: u32,
    pub remaining: u64,
    /// Time until the client's window resets
    pub reset_after: Duration,
}

impl RateLimitResult {
    pub fn into_rejection(self) -> LimiterError {
        LimiterError::RateExceeded {
            limit: self.limit,
            retry_after: self.reset_after,
        }
    }
}

/// Increment-and-compare admission over a counter store
pub struct Limiter {
    store: Arc<dyn CounterStore>,
    rate: u32,
    period: Duration,
    resolver: ClientResolver,
    store_timeout: Option<Duration>,
}

impl Limiter {
    pub fn new(store: Arc<dyn CounterStore>, rate: u32, resolver: ClientResolver) -> Self {
        Self {
            store,
            rate,
            period: DEFAULT_PERIOD,
            resolver,
            store_timeout: None,
        }
    }

    /// Validate the configuration and connect the selected store.
    pub async fn from_config(config: &LimiterConfig) -> Result<Self> {
        config.check()?;

        let store = store::build(config).await?;
        info!(
            backend = store.backend(),
            rate = config.rate,
            ttl = ?config.ttl,
            proxy_count = config.proxy_count,
            "Rate limiter ready"
        );

        let limiter = Self::new(store, config.rate, ClientResolver::new(config.proxy_count));
        Ok(if config.store_timeout.is_zero() {
            limiter
        } else {
            limiter.with_store_timeout(config.store_timeout)
        })
    }

    /// Fail store calls that take longer than `timeout`.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn resolver(&self) -> ClientResolver {
        self.resolver
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Count one request for `key` and decide whether it is admitted.
    ///
    /// The boundary is inclusive: the `rate`-th request of a window is still
    /// admitted, the next one is not. Store failures come back as errors and
    /// are never turned into a decision.
    pub async fn check(&self, key: &str) -> Result<RateLimitResult> {
        let increment = match self.store_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.store.increment(key))
                .await
                .map_err(|_| {
                    LimiterError::StoreUnavailable(format!(
                        "{} store did not answer within {:?}",
                        self.store.backend(),
                        timeout
                    ))
                })??,
            None => self.store.increment(key).await?,
        };

        let limit = u64::from(self.rate);
        let allowed = increment.count <= limit;
        let reset_after = if increment.expires_in.is_zero() {
            self.period
        } else {
            increment.expires_in
        };

        debug!(
            key = %key,
            count = increment.count,
            limit,
            allowed,
            "Rate limit check"
        );

        Ok(RateLimitResult {
            allowed,
            count: increment.count,
            limit: self.rate,
            remaining: limit.saturating_sub(increment.count),
            reset_after,
        })
    }
}

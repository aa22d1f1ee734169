use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::store::CounterStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub rate_limiting: bool,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub store: Option<ServiceStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

/// Reports whether the counter store is reachable
#[derive(Clone)]
pub struct HealthChecker {
    store: Option<Arc<dyn CounterStore>>,
}

impl HealthChecker {
    /// `store` is `None` when rate limiting is disabled.
    pub fn new(store: Option<Arc<dyn CounterStore>>) -> Self {
        Self { store }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let store_status = match &self.store {
            Some(store) => Some(check_store(store.as_ref()).await),
            None => None,
        };

        let overall_status = match &store_status {
            Some(status) if status.error.is_some() => "unhealthy",
            _ => "healthy",
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            rate_limiting: self.store.is_some(),
            dependencies: DependencyStatus {
                store: store_status,
            },
        }
    }
}

async fn check_store(store: &dyn CounterStore) -> ServiceStatus {
    let start = Instant::now();
    let result = store.ping().await;
    let response_time_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => ServiceStatus {
            backend: store.backend().to_string(),
            status: "healthy".to_string(),
            response_time_ms,
            error: None,
        },
        Err(e) => ServiceStatus {
            backend: store.backend().to_string(),
            status: "unavailable".to_string(),
            response_time_ms,
            error: Some(e.to_string()),
        },
    }
}

pub mod config;
pub mod error;
pub mod health;
pub mod identity;
pub mod limiter;
pub mod middleware;
pub mod server;
pub mod store;

pub use config::{Config, LimiterConfig, StoreKind};
pub use error::{LimiterError, Result};
pub use identity::ClientResolver;
pub use limiter::{Limiter, RateLimitResult};
pub use middleware::{admission_middleware, protect};
pub use server::create_app;
pub use store::{CounterStore, Increment, MemoryStore, RedisStore};

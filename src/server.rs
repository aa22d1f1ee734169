use crate::config::{Config, LimiterConfig};
use crate::error::Result;
use crate::health::HealthChecker;
use crate::limiter::Limiter;
use crate::middleware::protect;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        config.check()?;
        let app = create_app(&config.limiter).await?;

        Ok(Self {
            app,
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        info!("rate-gate listening on {}", listener.local_addr()?);
        info!("Health check available at /health");

        serve(listener, self.app).await
    }
}

/// Serve `app` on `listener` with client addresses available to the limiter.
pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Build the demo application.
///
/// `GET /` sits behind the admission layer when rate limiting is enabled;
/// `GET /health` is never rate limited.
pub async fn create_app(config: &LimiterConfig) -> Result<Router> {
    let mut app = Router::new().route("/", get(root));
    let mut store = None;

    if config.enabled {
        let limiter = Arc::new(Limiter::from_config(config).await?);
        store = Some(limiter.store().clone());
        app = protect(app, limiter);
    } else {
        warn!("Rate limiting is disabled");
    }

    Ok(app
        .route("/health", get(health).with_state(HealthChecker::new(store)))
        .layer(TraceLayer::new_for_http()))
}

async fn root() -> &'static str {
    "ok"
}

async fn health(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let status = checker.check_health().await;
    let code = if status.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

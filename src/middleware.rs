use crate::error::retry_after_secs;
use crate::limiter::{Limiter, RateLimitResult};
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Admission check run in front of every request.
///
/// Over-limit clients get `429 Too Many Requests`; a failing counter store
/// gets `500 Internal Server Error` with the backend error text as the body.
/// In both cases the inner handler is not called. Admitted requests are
/// passed on untouched.
pub async fn admission_middleware(
    State(limiter): State<Arc<Limiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client_key = limiter.resolver().resolve_request(&request);

    let result = match limiter.check(&client_key).await {
        Ok(result) => result,
        Err(err) => {
            error!(
                target: "rate_gate::middleware",
                client = %client_key,
                method = %request.method(),
                uri = %request.uri(),
                error = %err,
                "Rate limit check failed"
            );
            return err.into_response();
        }
    };

    if !result.allowed {
        debug!(
            target: "rate_gate::middleware",
            client = %client_key,
            count = result.count,
            limit = result.limit,
            "Rate limit exceeded"
        );
        return result.into_rejection().into_response();
    }

    let response = next.run(request).await;
    add_rate_limit_headers(response, &result)
}

/// Put the admission layer in front of every route of `router`.
pub fn protect<S>(router: Router<S>, limiter: Arc<Limiter>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(limiter, admission_middleware))
}

/// Add rate limit headers to successful responses
pub fn add_rate_limit_headers(mut response: Response, result: &RateLimitResult) -> Response {
    let headers = response.headers_mut();

    headers.insert("x-ratelimit-limit", HeaderValue::from(result.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(result.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(retry_after_secs(result.reset_after)),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ClientResolver, FORWARDED_FOR_HEADER};
    use crate::limiter::tests::FailingStore;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{header, StatusCode};
    use axum::routing::get;
    use http_body_util::BodyExt;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn counting_app(limiter: Limiter) -> (Router, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();

        let router = Router::new().route(
            "/",
            get(move || {
                let calls = handler_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );

        (protect(router, Arc::new(limiter)), calls)
    }

    fn memory_limiter(rate: u32, proxy_count: usize) -> Limiter {
        Limiter::new(
            Arc::new(MemoryStore::new(Duration::from_secs(60))),
            rate,
            ClientResolver::new(proxy_count),
        )
    }

    fn request_from(addr: &str, forwarded_for: Option<&str>) -> Request {
        let addr: SocketAddr = addr.parse().unwrap();
        let mut builder = axum::http::Request::builder().uri("/").extension(ConnectInfo(addr));
        if let Some(value) = forwarded_for {
            builder = builder.header(FORWARDED_FOR_HEADER, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_admitted_requests_reach_handler_once() {
        let (app, calls) = counting_app(memory_limiter(2, 0));

        let response = app
            .clone()
            .oneshot(request_from("203.0.113.7:50000", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "2");
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "1");
        assert_eq!(body_text(response).await, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_over_limit_is_rejected_without_calling_handler() {
        let (app, calls) = counting_app(memory_limiter(2, 0));

        for port in [50000, 50001] {
            let addr = format!("203.0.113.7:{}", port);
            let response = app.clone().oneshot(request_from(&addr, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request_from("203.0.113.7:50002", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_some());
        assert_eq!(body_text(response).await, "rate limit exceeded");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let limiter = Limiter::new(Arc::new(FailingStore), 10, ClientResolver::default());
        let (app, calls) = counting_app(limiter);

        let response = app
            .oneshot(request_from("203.0.113.7:50000", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "connection refused");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forwarded_header_ignored_without_trusted_proxies() {
        let (app, _) = counting_app(memory_limiter(1, 0));

        let first = app
            .clone()
            .oneshot(request_from("10.0.0.1:1000", Some("1.1.1.1")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        // a different forged header does not buy a new budget
        let second = app
            .clone()
            .oneshot(request_from("10.0.0.1:1001", Some("2.2.2.2")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_clients_behind_trusted_proxy_are_counted_separately() {
        let (app, calls) = counting_app(memory_limiter(1, 1));

        for client in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
            let response = app
                .clone()
                .oneshot(request_from("10.0.0.1:1000", Some(client)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request_from("10.0.0.1:1000", Some("9.9.9.9, 198.51.100.1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

/// Result type for admission operations
pub type Result<T> = std::result::Result<T, LimiterError>;

#[derive(Error, Debug)]
pub enum LimiterError {
    /// Invalid configuration, fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// The counter store could not be reached or the operation failed
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The client is over its rate for the current window
    #[error("rate limit exceeded")]
    RateExceeded { limit: u32, retry_after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LimiterError::RateExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            LimiterError::Config(_)
            | LimiterError::StoreUnavailable(_)
            | LimiterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        LimiterError::StoreUnavailable(err.to_string())
    }
}

impl From<validator::ValidationErrors> for LimiterError {
    fn from(err: validator::ValidationErrors) -> Self {
        LimiterError::Config(err.to_string())
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            LimiterError::StoreUnavailable(message) => message.clone(),
            other => other.to_string(),
        };
        let mut response = (status, body).into_response();

        if let LimiterError::RateExceeded { limit, retry_after } = self {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
        }

        response
    }
}

/// Whole seconds a client should wait, rounded up and never zero.
pub(crate) fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    let secs = if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            LimiterError::StoreUnavailable("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            LimiterError::RateExceeded {
                limit: 10,
                retry_after: Duration::from_secs(1)
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            LimiterError::Config("bad".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_rate_exceeded_response() {
        let response = LimiterError::RateExceeded {
            limit: 5,
            retry_after: Duration::from_millis(2500),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3");
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "5");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"rate limit exceeded");
    }

    #[tokio::test]
    async fn test_store_error_body_is_plain_text() {
        let response = LimiterError::StoreUnavailable("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"connection refused");
    }
}

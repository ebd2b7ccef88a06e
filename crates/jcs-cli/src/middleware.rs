//! HTTP middleware for rate limiting, request ids and access logging

use crate::error::{ApiError, S3ErrorCode};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type
pub type KeyedRateLimiter =
    RateLimiter<String, DefaultKeyedStateStore<String>, governor::clock::DefaultClock>;

/// Key used for requests that carry no credential
const ANONYMOUS: &str = "anonymous";

/// Create a rate limiter, or `None` when `requests_per_second` is 0
pub fn create_rate_limiter(requests_per_second: u32) -> Option<Arc<KeyedRateLimiter>> {
    let rps = NonZeroU32::new(requests_per_second)?;
    Some(Arc::new(RateLimiter::keyed(Quota::per_second(rps))))
}

/// Rate limiting middleware, keyed by the access key the request claims.
///
/// Runs before signature verification, so the key is taken from the
/// credential as sent.
pub async fn rate_limit_middleware(
    State(limiter): State<Option<Arc<KeyedRateLimiter>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(limiter) = limiter else {
        return next.run(request).await;
    };

    let key = claimed_access_key(&request).unwrap_or_else(|| ANONYMOUS.to_string());
    if limiter.check_key(&key).is_err() {
        tracing::debug!(access_key = %key, "rate limit exceeded");
        let error = ApiError::s3(S3ErrorCode::SlowDown, "Please reduce your request rate");
        return match request.extensions().get::<RequestId>() {
            Some(id) => error.to_response(request.method() == Method::HEAD, &id.0),
            None => error.into_response(),
        };
    }

    next.run(request).await
}

/// Access key from `Credential=` in the Authorization header or from
/// `X-Amz-Credential` in the query
fn claimed_access_key(request: &Request<Body>) -> Option<String> {
    let from_header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|auth| {
            let (_, rest) = auth.split_once("Credential=")?;
            rest.split('/').next().map(str::to_string)
        });
    if from_header.is_some() {
        return from_header;
    }

    request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let value = pair.strip_prefix("X-Amz-Credential=")?;
            let decoded = urlencoding::decode(value).ok()?;
            decoded.split('/').next().map(str::to_string)
        })
    })
}

/// Request ID middleware - adds x-amz-request-id header
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-amz-request-id", value);
    }
    response
}

/// Request ID extension
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    response
}

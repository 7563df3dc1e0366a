//! HTTP middleware for the API server
//!
//! Authentication, per-client rate limiting and structured request logging.

#[cfg(feature = "http-api")]
use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Json, Response},
};

#[cfg(feature = "http-api")]
use dashmap::DashMap;

#[cfg(feature = "http-api")]
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

#[cfg(feature = "http-api")]
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Instant,
};

#[cfg(feature = "http-api")]
use tracing::Instrument;

#[cfg(feature = "http-api")]
use super::routes::ApiError;

#[cfg(feature = "http-api")]
use super::types::ErrorResponse;

#[cfg(feature = "http-api")]
use crate::auth::{AuthGate, Credentials};

#[cfg(feature = "http-api")]
use crate::config::RateLimitConfig;

/// Paths reachable without credentials
#[cfg(feature = "http-api")]
const PUBLIC_PATHS: &[&str] = &["/", "/health"];

#[cfg(feature = "http-api")]
fn reject(status: StatusCode, code: &str, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

/// Connecting peer address, if the server was started with connect info
#[cfg(feature = "http-api")]
fn client_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

/// Authentication middleware.
///
/// Credentials come from `Authorization: Bearer` or `X-API-Key`; the gate
/// decides. Public paths and CORS preflights pass through.
#[cfg(feature = "http-api")]
pub async fn auth_middleware(
    State(gate): State<Arc<dyn AuthGate>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if PUBLIC_PATHS.contains(&request.uri().path())
        || request.method() == axum::http::Method::OPTIONS
    {
        return Ok(next.run(request).await);
    }

    let credentials = {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
        };
        Credentials::from_headers(header("authorization"), header("x-api-key"))
    };

    if !gate.is_authorized(&credentials) {
        tracing::warn!(
            path = %request.uri().path(),
            presented = credentials.api_key.is_some(),
            "Authentication failed"
        );
        return Err(reject(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Missing or invalid API key",
        ));
    }

    Ok(next.run(request).await)
}

#[cfg(feature = "http-api")]
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One token bucket per client IP
#[cfg(feature = "http-api")]
pub struct ClientRateLimiter {
    quota: Quota,
    limiters: DashMap<IpAddr, Arc<DirectLimiter>>,
}

#[cfg(feature = "http-api")]
impl ClientRateLimiter {
    /// `requests` per `period`, all of them available as an initial burst
    pub fn new(config: &RateLimitConfig) -> Option<Self> {
        let requests = NonZeroU32::new(config.requests)?;
        let replenish = config.period.checked_div(requests.get())?;
        let quota = Quota::with_period(replenish)?.allow_burst(requests);
        Some(Self {
            quota,
            limiters: DashMap::new(),
        })
    }

    fn limiter_for(&self, ip: IpAddr) -> Arc<DirectLimiter> {
        self.limiters
            .entry(ip)
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
            .clone()
    }

    /// Take one token for `ip`; false when the bucket is empty
    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter_for(ip).check().is_ok()
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiters.len()
    }
}

/// Rate limiting middleware.
///
/// Requests whose peer address is unknown are rejected rather than pooled
/// into one shared bucket.
#[cfg(feature = "http-api")]
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<ClientRateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(ip) = client_ip(&request) else {
        tracing::warn!("Rejecting request: could not determine client IP");
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "UNKNOWN_CLIENT",
            "Could not determine client address",
        ));
    };

    if !limiter.check(ip) {
        tracing::warn!(client_ip = %ip, "Rate limit exceeded");
        return Err(reject(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Too many requests",
        ));
    }

    Ok(next.run(request).await)
}

/// Request logging middleware with one span per request
#[cfg(feature = "http-api")]
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = client_ip(&request).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        status_code = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let start_time = Instant::now();
    span.in_scope(|| tracing::debug!("Processing request"));
    let response = next.run(request).instrument(span.clone()).await;

    let latency_ms = start_time.elapsed().as_millis() as u64;
    let status_code = response.status().as_u16();
    span.record("status_code", status_code);
    span.record("latency_ms", latency_ms);

    span.in_scope(|| {
        if response.status().is_server_error() {
            tracing::warn!(status_code, latency_ms, "Request completed");
        } else {
            tracing::info!(status_code, latency_ms, "Request completed");
        }
    });

    response
}

#[cfg(all(test, feature = "http-api"))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(requests: u32, period: Duration) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests,
            period,
        }
    }

    #[test]
    fn test_limiter_allows_burst_then_rejects() {
        let limiter = ClientRateLimiter::new(&config(3, Duration::from_secs(3600))).unwrap();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn test_limiter_buckets_are_per_client() {
        let limiter = ClientRateLimiter::new(&config(1, Duration::from_secs(3600))).unwrap();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_zero_requests_disables_limiter() {
        assert!(ClientRateLimiter::new(&config(0, Duration::from_secs(60))).is_none());
    }

    #[tokio::test]
    async fn test_auth_middleware_guards_protected_paths() {
        use crate::auth::ApiKeyGate;
        use axum::{middleware, routing::get, Router};

        let gate: Arc<dyn AuthGate> = Arc::new(ApiKeyGate::new(["secret"]));
        let app = Router::new()
            .route("/health", get(|| async { "up" }))
            .route("/models", get(|| async { "[]" }))
            .layer(middleware::from_fn_with_state(gate, auth_middleware));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let status = |path: &'static str, key: Option<&'static str>| {
            let mut request = client.get(format!("{}{}", base, path));
            if let Some(key) = key {
                request = request.header("x-api-key", key);
            }
            async move { request.send().await.unwrap().status() }
        };

        assert_eq!(status("/health", None).await, StatusCode::OK);
        assert_eq!(status("/models", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status("/models", Some("wrong")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status("/models", Some("secret")).await, StatusCode::OK);
    }
}

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::error::ApiError;

const API_MESSAGE: &str = "Too many requests from this IP, please try again after 15 minutes";
const LOGIN_MESSAGE: &str = "Too many login attempts from this IP, please try again after an hour";

/// RateLimit
///
/// A per-client-IP budget of `max` requests per `window`. The budget refills
/// continuously (GCRA), so a client that waits `window / max` earns one more
/// request. Clones share the same counters.
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    message: &'static str,
}

impl RateLimit {
    pub fn new(max: u32, window: Duration, message: &'static str) -> Self {
        let burst = NonZeroU32::new(max).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            message,
        }
    }

    /// Everything under `/api`: 100 requests per 15 minutes.
    pub fn api() -> Self {
        Self::new(100, Duration::from_secs(15 * 60), API_MESSAGE)
    }

    /// `POST /api/auth/login`: 10 attempts per hour.
    pub fn login() -> Self {
        Self::new(10, Duration::from_secs(60 * 60), LOGIN_MESSAGE)
    }

    /// Spends one request of `ip`'s budget.
    pub fn check(&self, ip: IpAddr) -> Result<(), ApiError> {
        self.limiter
            .check_key(&ip)
            .map_err(|_| ApiError::too_many_requests(self.message))
    }
}

/// The peer address recorded by `into_make_service_with_connect_info`. Requests
/// without one (e.g. driven in-process) share a single budget.
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// rate_limit
///
/// Middleware rejecting a request with a 429 envelope once its client IP has
/// spent the budget of `limit`.
pub async fn rate_limit(State(limit): State<RateLimit>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request);
    if let Err(rejection) = limit.check(ip) {
        tracing::warn!(%ip, uri = %request.uri(), "rate limit exceeded");
        return rejection.into_response();
    }
    next.run(request).await
}

// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Middleware module for HTTP request processing
//!
//! This module provides the security header stage, the origin guard, the
//! per-IP fixed-window rate limiter and the access-log span used by the
//! request tracing layer.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::{Span, debug, error, info_span, warn};

use crate::{config::RateLimitingConfig, correlation::RequestContext, metrics};

const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;

/// Body of the rejection sent once a client exceeds its budget
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again later.";

/// Paths never counted against a client's budget
pub const RATE_LIMIT_EXEMPT_PATHS: [&str; 3] = ["/health", "/api", "/metrics"];

const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

const SECURITY_HEADERS: [(HeaderName, &str); 10] = [
    (
        header::CONTENT_SECURITY_POLICY,
        "default-src 'self';base-uri 'self';font-src 'self' https: data:;form-action 'self';\
         frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src 'self';\
         script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests",
    ),
    (
        HeaderName::from_static("cross-origin-opener-policy"),
        "same-origin",
    ),
    (
        HeaderName::from_static("cross-origin-resource-policy"),
        "same-origin",
    ),
    (HeaderName::from_static("origin-agent-cluster"), "?1"),
    (header::REFERRER_POLICY, "no-referrer"),
    (
        header::STRICT_TRANSPORT_SECURITY,
        "max-age=31536000; includeSubDomains",
    ),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_DNS_PREFETCH_CONTROL, "off"),
    (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
    (
        HeaderName::from_static("x-permitted-cross-domain-policies"),
        "none",
    ),
];

/// Security header stage
///
/// Adds the static hardening headers to every response. Headers already set
/// by an inner stage or handler are left untouched.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    for (name, value) in SECURITY_HEADERS {
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }

    response
}

/// Body of the rejection sent to requests from an unlisted origin
pub const FOREIGN_ORIGIN_MESSAGE: &str = "Origin not allowed";

/// Origins admitted by the cross-origin stage
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: Arc<[HeaderValue]>,
}

impl OriginPolicy {
    /// Admit exactly `allowed`, plus same-origin requests
    pub fn new(allowed: Vec<HeaderValue>) -> Self {
        Self {
            allowed: allowed.into(),
        }
    }

    /// Whether a request carrying these headers may proceed
    ///
    /// Requests without `Origin` are not cross-origin and always pass.
    pub fn admits(&self, headers: &HeaderMap) -> bool {
        let Some(origin) = headers.get(header::ORIGIN) else {
            return true;
        };
        self.allowed.contains(origin) || is_same_origin(origin, headers)
    }
}

fn is_same_origin(origin: &HeaderValue, headers: &HeaderMap) -> bool {
    let Some(host) = headers.get(header::HOST).and_then(|host| host.to_str().ok()) else {
        return false;
    };
    origin
        .to_str()
        .ok()
        .and_then(|origin| origin.split_once("://"))
        .is_some_and(|(_, authority)| authority.eq_ignore_ascii_case(host))
}

/// Cross-origin rejection
///
/// Runs inside the CORS layer, which has already answered preflights.
/// Requests from an origin outside the allow-list end here with `403`.
pub async fn reject_foreign_origin(
    State(policy): State<OriginPolicy>,
    req: Request,
    next: Next,
) -> Response {
    if policy.admits(req.headers()) {
        return next.run(req).await;
    }

    warn!(
        origin = ?req.headers().get(header::ORIGIN),
        path = %req.uri().path(),
        "cross-origin request from unlisted origin rejected"
    );
    (StatusCode::FORBIDDEN, FOREIGN_ORIGIN_MESSAGE).into_response()
}

/// Rate limiting middleware state
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitingConfig,
    // Per-key entry locks make each check-and-increment atomic
    requests: Arc<DashMap<IpAddr, RequestCounter>>,
}

/// Request count of one client within its current window
#[derive(Debug, Clone, Copy)]
pub struct RequestCounter {
    count: u32,
    window_start: Instant,
}

/// Outcome of counting one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Requests admitted per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Time until the current window closes
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// Seconds until reset, rounded up
    pub fn reset_seconds(&self) -> u64 {
        self.reset_after.as_secs() + u64::from(self.reset_after.subsec_nanos() > 0)
    }
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitingConfig) -> Self {
        Self {
            config,
            requests: Arc::new(DashMap::new()),
        }
    }

    /// Check if rate limiting is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Count a request from `ip` and decide whether it is admitted
    pub fn check(&self, ip: IpAddr) -> RateLimitDecision {
        self.hit_at(ip, Instant::now())
    }

    /// Count a request from `ip` observed at `now`
    ///
    /// Once the table is full, expired windows are swept. If every tracked
    /// window is still open, requests from untracked clients are refused
    /// rather than dropping a live counter.
    pub fn hit_at(&self, ip: IpAddr, now: Instant) -> RateLimitDecision {
        let window = self.config.window();
        let limit = self.config.max_requests;

        if self.requests.len() >= MAX_RATE_LIMIT_ENTRIES && !self.requests.contains_key(&ip) {
            self.cleanup_expired_entries(now, window);
            if self.requests.len() >= MAX_RATE_LIMIT_ENTRIES {
                warn!(
                    %ip,
                    tracked = self.requests.len(),
                    "rate limiter table full, refusing untracked client"
                );
                return RateLimitDecision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset_after: window,
                };
            }
        }

        let counter = {
            let mut entry = self.requests.entry(ip).or_insert(RequestCounter {
                count: 0,
                window_start: now,
            });
            if now.saturating_duration_since(entry.window_start) >= window {
                entry.count = 0;
                entry.window_start = now;
            }
            entry.count = entry.count.saturating_add(1);
            *entry
        };

        let elapsed = now.saturating_duration_since(counter.window_start);
        let decision = RateLimitDecision {
            allowed: counter.count <= limit,
            limit,
            remaining: limit.saturating_sub(counter.count),
            reset_after: window.saturating_sub(elapsed),
        };

        if !decision.allowed {
            debug!(%ip, count = counter.count, "rate limiting client");
        }
        decision
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }

    /// Drop counters whose window has closed
    fn cleanup_expired_entries(&self, now: Instant, window: Duration) {
        let entries_before = self.requests.len();

        self.requests
            .retain(|_, counter| now.saturating_duration_since(counter.window_start) < window);

        let entries_after = self.requests.len();
        let cleaned_up = entries_before.saturating_sub(entries_after);

        if cleaned_up > 0 {
            debug!("cleaned up {} expired rate limiter entries", cleaned_up);
        }
    }

    /// Client key of a request
    ///
    /// The socket peer address, or the first `X-Forwarded-For` hop when the
    /// limiter is configured to trust a reverse proxy.
    fn client_ip(&self, req: &Request) -> IpAddr {
        if self.config.trust_proxy {
            if let Some(ip) = forwarded_for(req.headers()) {
                return ip;
            }
        }

        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ConnectInfo(addr)| {
                addr.ip()
            })
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision, window: u64) {
    let values = [
        (RATELIMIT_POLICY, format!("{};w={window}", decision.limit)),
        (RATELIMIT_LIMIT, decision.limit.to_string()),
        (RATELIMIT_REMAINING, decision.remaining.to_string()),
        (RATELIMIT_RESET, decision.reset_seconds().to_string()),
    ];

    for (name, value) in values {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Rate limiting middleware function
pub async fn rate_limiting_middleware(
    State(rate_limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if !rate_limiter.is_enabled() || RATE_LIMIT_EXEMPT_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let client_ip = rate_limiter.client_ip(&req);
    let decision = rate_limiter.check(client_ip);
    let window = rate_limiter.config.window_seconds;

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        warn!(ip = %client_ip, path = %req.uri().path(), "rate limit exceeded");
        metrics::inc_rate_limit_rejections();

        let mut response = (StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE).into_response();
        if let Ok(retry_after) = HeaderValue::from_str(&decision.reset_seconds().to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, retry_after);
        }
        response
    };

    insert_rate_limit_headers(response.headers_mut(), &decision, window);
    response
}

/// Span for the access log of one request
///
/// Reads the correlation id from the request context so every event logged
/// while the request is handled carries it.
pub fn access_log_span(req: &axum::http::Request<Body>) -> Span {
    if let Some(context) = req.extensions().get::<RequestContext>() {
        info_span!(
            "http_request",
            correlation_id = %context.correlation_id(),
            method = %req.method(),
            uri = %req.uri(),
        )
    } else {
        error!("failed to extract correlation context from request");
        info_span!(
            "http_request",
            correlation_id = "unknown",
            method = %req.method(),
            uri = %req.uri(),
        )
    }
}

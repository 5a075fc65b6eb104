// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Middleware pipeline builder
//!
//! Every request passes the stages in [`Stage::ORDER`]. The order is fixed by
//! construction: [`build`] applies all of them in one `ServiceBuilder` chain,
//! outermost first, so no caller can register a stage out of place.

use std::{fmt, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware::{from_fn, from_fn_with_state},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    LatencyUnit,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug};

use crate::{
    config::ServerConfig,
    correlation::{CorrelationSettings, REQUEST_ID_HEADER, correlation_middleware},
    error::{ServerError, ServerResult},
    error_boundary::error_boundary,
    middleware::{
        OriginPolicy, RateLimiter, access_log_span, rate_limiting_middleware,
        reject_foreign_origin, security_headers_middleware,
    },
    session::{SessionMemoryStore, pin_session_expiry, session_layer, session_lifetime},
};

const CORS_MAX_AGE: Duration = Duration::from_secs(600);

/// A named step of the request pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Static hardening headers
    SecurityHeaders,
    /// Cross-origin policy, answers preflight requests and rejects
    /// requests from origins outside the allow-list
    CrossOrigin,
    /// Per-IP fixed-window rate limiting
    RateLimiting,
    /// Signed cookie sessions
    Session,
    /// Request body size limits
    BodyParsing,
    /// Correlation id, deadline and cancellation per request
    Correlation,
    /// Access log span and response line
    AccessLog,
    /// Route registry dispatch
    Routing,
    /// Failure to envelope conversion
    ErrorBoundary,
}

impl Stage {
    /// Stages in the order every request meets them
    ///
    /// The error boundary is declared last and wraps routing directly.
    pub const ORDER: [Self; 9] = [
        Self::SecurityHeaders,
        Self::CrossOrigin,
        Self::RateLimiting,
        Self::Session,
        Self::BodyParsing,
        Self::Correlation,
        Self::AccessLog,
        Self::Routing,
        Self::ErrorBoundary,
    ];

    /// Stage name for logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::SecurityHeaders => "security_headers",
            Self::CrossOrigin => "cross_origin",
            Self::RateLimiting => "rate_limiting",
            Self::Session => "session",
            Self::BodyParsing => "body_parsing",
            Self::Correlation => "correlation",
            Self::AccessLog => "access_log",
            Self::Routing => "routing",
            Self::ErrorBoundary => "error_boundary",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wrap the application router in the full pipeline
///
/// `abandon` is the parent of every request's cancellation token and
/// `sessions` backs the session stage.
///
/// # Errors
///
/// Returns `ServerError::Config` if an allowed origin is not a valid header value.
pub fn build(
    router: Router,
    config: &ServerConfig,
    abandon: CancellationToken,
    sessions: SessionMemoryStore,
) -> ServerResult<Router> {
    let origins = allowed_origins(config)?;
    let rate_limiter = RateLimiter::new(config.rate_limiting.clone());
    let correlation = CorrelationSettings {
        timeout: config.timeout_seconds.value(),
        abandon,
    };

    // Outermost stages, up to the extractor body limit
    let admission = ServiceBuilder::new()
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(origins.clone()))
        .layer(from_fn_with_state(
            OriginPolicy::new(origins),
            reject_foreign_origin,
        ))
        .layer(from_fn_with_state(rate_limiter, rate_limiting_middleware))
        .layer(session_layer(sessions, &config.session, config.environment))
        .layer(from_fn_with_state(
            session_lifetime(&config.session),
            pin_session_expiry,
        ))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes));

    let handling = ServiceBuilder::new()
        .layer(from_fn_with_state(correlation, correlation_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(access_log_span)
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(from_fn(error_boundary));

    debug!(
        stages = ?Stage::ORDER.map(Stage::name),
        "request pipeline assembled"
    );

    // `RequestBodyLimitLayer` changes the request body type, so it sits
    // between the two chains where `Route` converts the body back.
    Ok(router
        .layer(handling)
        .layer(RequestBodyLimitLayer::new(config.body_limit_bytes))
        .layer(admission))
}

fn allowed_origins(config: &ServerConfig) -> ServerResult<Vec<HeaderValue>> {
    config
        .allowed_origins()
        .into_iter()
        .map(|origin| {
            HeaderValue::from_str(&origin).map_err(|e| ServerError::Config {
                message: format!("invalid allowed origin {origin:?}: {e}"),
            })
        })
        .collect()
}

fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            REQUEST_ID_HEADER,
        ])
        .expose_headers([REQUEST_ID_HEADER])
        .max_age(CORS_MAX_AGE)
}

// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Correlation context propagation
//!
//! Every request gets a freshly generated correlation id at pipeline entry.
//! The id travels in a [`RequestContext`] stored in the request extensions,
//! together with the request deadline and a cancellation token, and is echoed
//! in the `x-request-id` response header.

use std::{fmt, sync::Arc, time::Duration};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderName, HeaderValue, request::Parts},
    middleware::Next,
    response::Response,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::error::ServerError;

/// Header carrying the correlation id on requests and responses
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Opaque per-request identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a new random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request-scoped context created by the correlation stage
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    deadline: Instant,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a context expiring `timeout` from now
    ///
    /// The cancellation token is a child of `parent`, so it fires when the
    /// server abandons in-flight work or when this request misses its deadline.
    pub fn new(timeout: Duration, parent: &CancellationToken) -> Self {
        Self {
            correlation_id: CorrelationId::generate(),
            deadline: Instant::now() + timeout,
            cancellation: parent.child_token(),
        }
    }

    /// Correlation id of the request
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Instant by which the request must be answered
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Token signalling that the request's work should stop
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| ServerError::Runtime {
                message: "request context missing; correlation stage not installed".to_string(),
            })
    }
}

/// Settings the correlation stage builds each context from
#[derive(Debug, Clone)]
pub struct CorrelationSettings {
    /// Per-request deadline
    pub timeout: Duration,
    /// Parent of every request cancellation token
    pub abandon: CancellationToken,
}

/// Correlation stage: create the context and echo the id
///
/// Any incoming `x-request-id` is overwritten so ids are never reused or
/// chosen by the caller.
pub async fn correlation_middleware(
    State(settings): State<CorrelationSettings>,
    mut req: Request,
    next: Next,
) -> Response {
    let context = RequestContext::new(settings.timeout, &settings.abandon);
    let header = HeaderValue::from_str(context.correlation_id().as_str()).ok();

    match &header {
        Some(value) => {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        }
        None => warn!("correlation id is not a valid header value"),
    }
    req.extensions_mut().insert(context);

    let mut response = next.run(req).await;
    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

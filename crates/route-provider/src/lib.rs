// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Capability trait and failure types for mountable route providers
//!
//! Domain services are consumed by the gateway only through their ability to
//! mount routes under a path prefix. This crate defines that single capability
//! together with the failure vocabulary shared between providers and the
//! gateway's error boundary.
//!
//! # Core Abstractions
//!
//! - **`RouteProvider` Trait**: one operation, "give me the routes to mount"
//! - **`ProviderError`**: failures a provider raises while handling a request
//! - **`UnhandledFailure`**: response marker the error boundary converts into
//!   the uniform error envelope

use std::{fmt, sync::Arc};

use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// A collaborator that handles every request under a mounted path prefix
///
/// Implementations are treated as black boxes: the gateway nests the returned
/// router under the provider's prefix and never inspects individual routes.
pub trait RouteProvider: Send + Sync + fmt::Debug {
    /// Name used in logs and the service description
    fn name(&self) -> &'static str;

    /// Build the routes served under this provider's prefix
    ///
    /// Paths are relative to the mount point, so `/ping` is reachable at
    /// `{prefix}/ping`.
    fn routes(&self) -> Router;
}

impl<T: RouteProvider + ?Sized> RouteProvider for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn routes(&self) -> Router {
        (**self).routes()
    }
}

/// Failures raised by a provider while handling a single request
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ProviderError {
    /// A third-party integration returned an error or garbage
    #[error("Upstream integration {integration} failed: {message}")]
    Upstream {
        integration: String,
        message: String,
    },

    /// The provider cannot serve requests right now
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    /// Provider bug or unexpected state
    #[error("Internal provider error: {message}")]
    Internal { message: String },

    /// Provider independent error
    #[error(transparent)]
    Custom {
        #[from]
        error: anyhow::Error,
    },
}

impl ProviderError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an upstream integration error
    pub fn upstream(integration: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            integration: integration.into(),
            message: message.into(),
        }
    }

    /// Server-error status the failure maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } | Self::Custom { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upstream { .. } => "upstream",
            Self::Unavailable { .. } => "unavailable",
            Self::Internal { .. } => "internal",
            Self::Custom { .. } => "custom",
        }
    }
}

impl IntoResponse for ProviderError {
    fn into_response(self) -> Response {
        // The body stays empty: the error boundary owns what the caller sees.
        let mut response = self.status_code().into_response();
        response
            .extensions_mut()
            .insert(UnhandledFailure::new(self.kind(), self.to_string()));
        response
    }
}

/// Marker attached to responses that represent a failed request
///
/// Carries the internal detail to the error boundary, which logs it and
/// replaces the response body. The detail is never sent to the caller.
#[derive(Debug, Clone)]
pub struct UnhandledFailure {
    kind: &'static str,
    detail: Arc<str>,
}

impl UnhandledFailure {
    /// Create a new failure marker
    pub fn new(kind: &'static str, detail: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Short failure label
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Internal failure detail, for logs only
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

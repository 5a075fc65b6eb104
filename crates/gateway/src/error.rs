// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error handling module
//!
//! This module provides the error types for server operations and the uniform
//! envelope every failed request is answered with.

use std::net::SocketAddr;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use route_provider::UnhandledFailure;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::correlation::CorrelationId;

/// Message every server-side failure is reported with
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Error types for server operations
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration validation errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Network binding errors
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Socket address that failed to bind
        address: SocketAddr,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server startup errors
    #[error("Server startup failed: {source}")]
    Startup {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Lifecycle operation not allowed in the current state
    #[error("Invalid lifecycle transition: {message}")]
    Lifecycle {
        /// Error message
        message: String,
    },

    /// Runtime errors during server operation
    #[error("Runtime error: {message}")]
    Runtime {
        /// Error message
        message: String,
    },

    /// Signal handling errors
    #[error("Signal handling error: {message}")]
    Signal {
        /// Error message
        message: String,
    },
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Rendered by the error boundary; the detail only reaches the logs.
        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response
            .extensions_mut()
            .insert(UnhandledFailure::new("server", self.to_string()));
        response
    }
}

/// Uniform body of every failed request
///
/// ```json
/// {
///   "status": "error",
///   "message": "Internal server error",
///   "timestamp": "2025-01-01T00:00:00+00:00",
///   "correlationId": "5f0c..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Always `"error"`
    pub status: String,
    /// Caller-safe message
    pub message: String,
    /// RFC 3339 timestamp of the failure
    pub timestamp: String,
    /// Correlation id of the failed request
    pub correlation_id: String,
}

impl ErrorEnvelope {
    /// Create an envelope with a caller-safe message
    pub fn new(message: impl Into<String>, correlation_id: &CorrelationId) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.to_string(),
        }
    }

    /// Envelope for an unexpected server-side failure
    pub fn internal(correlation_id: &CorrelationId) -> Self {
        Self::new(INTERNAL_ERROR_MESSAGE, correlation_id)
    }

    /// Render the envelope with the given status
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

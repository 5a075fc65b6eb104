// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP request handlers module
//!
//! Handlers for the endpoints the gateway answers itself: health, service
//! info and the catch-all.

use std::collections::BTreeMap;

use axum::{
    Extension, Json,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;

use crate::{
    correlation::{CorrelationId, RequestContext},
    error::ErrorEnvelope,
    state::ServerState,
};

/// Name reported by the service info endpoint
pub const SERVICE_NAME: &str = "BizCore API";

/// Body of `GET /health`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the process serves requests
    pub status: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Time since start, `"{h}h {m}m {s}s"`
    pub uptime: String,
}

/// Body of `GET /api`
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name
    pub name: String,
    /// Service version
    pub version: String,
    /// Mount prefix of every domain, keyed by domain slug
    pub endpoints: BTreeMap<String, String>,
}

/// Body of the catch-all outside production
#[derive(Debug, Serialize, Deserialize)]
pub struct DevelopmentNotice {
    /// Human-readable notice
    pub message: String,
    /// Where the client application is served from
    pub client: String,
}

/// Health check endpoint handler
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime: state.uptime().uptime().to_string(),
    })
}

/// Service info endpoint handler
pub async fn service_info_handler(State(state): State<ServerState>) -> Json<ServiceInfo> {
    let endpoints = state
        .registry()
        .domains()
        .map(|domain| (domain.slug().to_string(), domain.prefix().to_string()))
        .collect();

    Json(ServiceInfo {
        name: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints,
    })
}

/// Catch-all handler, registered after every other route
///
/// Unmatched API paths get a JSON `404`. Everything else is the client
/// application: the bundle in production, a pointer to the dev server
/// otherwise.
pub async fn catch_all_handler(
    State(state): State<ServerState>,
    context: Option<Extension<RequestContext>>,
    req: Request,
) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        let correlation_id = context.map_or_else(CorrelationId::generate, |Extension(context)| {
            context.correlation_id().clone()
        });
        return ErrorEnvelope::new("Not found", &correlation_id)
            .into_response_with(StatusCode::NOT_FOUND);
    }

    match state.client_bundle() {
        Some(bundle) => match bundle.clone().oneshot(req).await {
            Ok(response) => response.into_response(),
            // `ServeDir` with a `ServeFile` fallback never fails
            Err(never) => match never {},
        },
        None => Json(DevelopmentNotice {
            message: "API server running in development mode; the client is served separately"
                .to_string(),
            client: state.config().client_dev_url.clone(),
        })
        .into_response(),
    }
}

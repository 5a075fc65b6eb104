// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Request error boundary
//!
//! Innermost stage of the pipeline, directly around routing. Converts every
//! in-request failure into the uniform error envelope: panics, responses
//! flagged with [`UnhandledFailure`], and requests that miss their deadline.

use std::{any::Any, panic::AssertUnwindSafe};

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;
use route_provider::UnhandledFailure;
use tracing::{error, warn};

use crate::{
    correlation::{CorrelationId, RequestContext},
    error::ErrorEnvelope,
    metrics,
};

/// Error boundary middleware function
pub async fn error_boundary(req: Request, next: Next) -> Response {
    let context = req.extensions().get::<RequestContext>().cloned();
    let correlation_id = context.as_ref().map_or_else(
        || {
            warn!("request reached the error boundary without a correlation context");
            CorrelationId::generate()
        },
        |context| context.correlation_id().clone(),
    );

    let guarded = AssertUnwindSafe(next.run(req)).catch_unwind();
    let outcome = match &context {
        Some(context) => tokio::time::timeout_at(context.deadline(), guarded).await.ok(),
        None => Some(guarded.await),
    };

    match outcome {
        Some(Ok(response)) => render_flagged(response, &correlation_id),
        Some(Err(panic)) => {
            error!(
                correlation_id = %correlation_id,
                panic = panic_message(panic.as_ref()),
                "request handler panicked"
            );
            metrics::inc_request_failures("panic");
            ErrorEnvelope::internal(&correlation_id)
                .into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
        }
        None => {
            if let Some(context) = &context {
                context.cancellation().cancel();
            }
            error!(correlation_id = %correlation_id, "request exceeded its deadline");
            metrics::inc_request_failures("timeout");
            ErrorEnvelope::internal(&correlation_id).into_response_with(StatusCode::GATEWAY_TIMEOUT)
        }
    }
}

fn render_flagged(response: Response, correlation_id: &CorrelationId) -> Response {
    let Some(failure) = response.extensions().get::<UnhandledFailure>() else {
        return response;
    };

    error!(
        correlation_id = %correlation_id,
        kind = failure.kind(),
        detail = failure.detail(),
        "request failed"
    );
    metrics::inc_request_failures(failure.kind());

    let status = if response.status().is_server_error() {
        response.status()
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    ErrorEnvelope::internal(correlation_id).into_response_with(status)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

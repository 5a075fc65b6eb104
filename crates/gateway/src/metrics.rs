// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics module
//!
//! Provides global metrics using the default Prometheus registry via macros and
//! an Axum-compatible metrics handler.

use std::sync::LazyLock;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};
use tracing::error;

use crate::lifecycle::LifecycleState;

/// Requests rejected by the rate limiter.
#[allow(clippy::expect_used)]
pub static RATE_LIMIT_REJECTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "bizcore_rate_limit_rejections_total",
        "Total number of requests rejected by the rate limiter"
    )
    .expect("Failed to create bizcore_rate_limit_rejections_total counter")
});

/// Requests answered by the error boundary, labeled by failure `kind`.
#[allow(clippy::expect_used)]
pub static REQUEST_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "bizcore_request_failures_total",
        "Total number of failed requests, labeled by failure kind",
        &["kind"]
    )
    .expect("Failed to create bizcore_request_failures_total counter vec")
});

/// Current lifecycle state of the server instance.
#[allow(clippy::expect_used)]
pub static LIFECYCLE_STATE: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "bizcore_lifecycle_state",
        "Lifecycle state (0 stopped, 1 starting, 2 running, 3 shutting down, 4 failed)"
    )
    .expect("Failed to create bizcore_lifecycle_state gauge")
});

/// Count one rate limit rejection
pub fn inc_rate_limit_rejections() {
    RATE_LIMIT_REJECTIONS.inc();
}

/// Count one failed request
///
/// # Arguments
/// * `kind` - The failure kind (panic, timeout, upstream, ...)
pub fn inc_request_failures(kind: &str) {
    REQUEST_FAILURES.with_label_values(&[kind]).inc();
}

/// Publish a lifecycle transition
pub fn set_lifecycle_state(state: LifecycleState) {
    LIFECYCLE_STATE.set(state.as_gauge());
}

/// Axum handler that exports metrics in Prometheus text format
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_counter_is_labeled() {
        let before = REQUEST_FAILURES.with_label_values(&["test_kind"]).get();
        inc_request_failures("test_kind");
        assert_eq!(
            REQUEST_FAILURES.with_label_values(&["test_kind"]).get(),
            before + 1
        );
    }

    #[tokio::test]
    async fn handler_exports_registered_metrics() {
        set_lifecycle_state(LifecycleState::Running);
        inc_rate_limit_rejections();

        let response = metrics_handler().await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let text = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(text.contains("bizcore_rate_limit_rejections_total"));
        assert!(text.contains("bizcore_lifecycle_state"));
    }
}

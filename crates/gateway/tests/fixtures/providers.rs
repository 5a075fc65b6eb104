// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Route providers with scripted behavior

use std::{sync::Arc, time::Duration};

use axum::{Json, Router, http::StatusCode, routing::get};
use route_provider::{ProviderError, RouteProvider};
use serde_json::json;
use tokio::sync::Notify;
use tower_sessions::Session;

/// Answers `GET /start` with an upstream failure
#[derive(Debug)]
pub struct FailingProvider;

impl RouteProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn routes(&self) -> Router {
        Router::new().route(
            "/start",
            get(|| async {
                Err::<(), _>(ProviderError::upstream(
                    "course-catalog",
                    "connection reset by peer",
                ))
            }),
        )
    }
}

/// Panics while handling `GET /start`
#[derive(Debug)]
pub struct PanickingProvider;

#[allow(clippy::panic)]
async fn explode() -> &'static str {
    panic!("training provider exploded")
}

impl RouteProvider for PanickingProvider {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn routes(&self) -> Router {
        Router::new().route("/start", get(explode))
    }
}

/// Answers `GET /work` after a delay, signalling when the handler was entered
#[derive(Debug, Clone)]
pub struct SlowProvider {
    /// Time the handler takes
    pub delay: Duration,
    /// Notified once a request reached the handler
    pub entered: Arc<Notify>,
}

impl SlowProvider {
    /// Create a provider taking `delay` per request
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            entered: Arc::new(Notify::new()),
        }
    }
}

impl RouteProvider for SlowProvider {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn routes(&self) -> Router {
        let provider = self.clone();
        Router::new().route(
            "/work",
            get(move || async move {
                provider.entered.notify_one();
                tokio::time::sleep(provider.delay).await;
                "done"
            }),
        )
    }
}

/// Stores a user in the session on `GET /login`, reads it on `GET /whoami`
#[derive(Debug)]
pub struct SessionProvider;

impl RouteProvider for SessionProvider {
    fn name(&self) -> &'static str {
        "session"
    }

    fn routes(&self) -> Router {
        Router::new()
            .route(
                "/login",
                get(|session: Session| async move {
                    session
                        .insert("user", "ada")
                        .await
                        .map(|()| StatusCode::NO_CONTENT)
                        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
                }),
            )
            .route(
                "/whoami",
                get(|session: Session| async move {
                    let user = session.get::<String>("user").await.ok().flatten();
                    Json(json!({ "user": user }))
                }),
            )
            .route(
                "/logout",
                get(|session: Session| async move {
                    session
                        .flush()
                        .await
                        .map(|()| StatusCode::NO_CONTENT)
                        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
                }),
            )
    }
}

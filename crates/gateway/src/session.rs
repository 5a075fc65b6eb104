// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Cookie sessions with a fixed lifetime
//!
//! Sessions live in an in-memory store behind a signed cookie. A session is
//! only created once a handler writes to it, and expires a fixed time after
//! creation no matter how often it is used afterwards. Expired records are
//! deleted by [`sweep_expired_sessions`].

mod store;

use std::time::Duration as StdDuration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha512};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower_sessions::{
    Expiry, Session, SessionManagerLayer,
    cookie::{
        Key, SameSite,
        time::{Duration, OffsetDateTime},
    },
    service::SignedCookie,
    session_store::ExpiredDeletion,
};
use tracing::{debug, warn};

pub use store::SessionMemoryStore;

use crate::config::{Environment, SessionConfig};

/// Session key holding the unix timestamp the session was created at
pub const CREATED_AT_KEY: &str = "_created_at";

/// Period of the expired-session sweep
pub const SESSION_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Session manager layer for the given settings
///
/// The cookie is always `HttpOnly`, marked `Secure` only in production and
/// signed with a key derived from the configured secret.
pub fn session_layer(
    store: SessionMemoryStore,
    config: &SessionConfig,
    environment: Environment,
) -> SessionManagerLayer<SessionMemoryStore, SignedCookie> {
    SessionManagerLayer::new(store)
        .with_name(config.cookie_name.clone())
        .with_http_only(true)
        .with_secure(environment.is_production())
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(session_lifetime(config)))
        .with_signed(signing_key(&config.secret))
}

/// Fixed session lifetime as a cookie duration
pub fn session_lifetime(config: &SessionConfig) -> Duration {
    Duration::hours(i64::from(config.lifetime_hours))
}

// SHA-512 yields exactly the 64 bytes a cookie key needs.
fn signing_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

/// Pin the expiry of written sessions to creation time plus lifetime
///
/// Runs directly inside the session layer. Sessions the request never wrote
/// to are left alone, so no cookie is issued for them.
pub async fn pin_session_expiry(
    State(lifetime): State<Duration>,
    session: Session,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;

    if session.is_empty().await {
        return response;
    }

    if let Err(e) = pin_expiry(&session, lifetime).await {
        warn!(error = %e, "failed to pin session expiry");
    }

    response
}

/// Delete expired sessions every `period` until `shutdown` is cancelled
///
/// # Errors
///
/// Returns the store error that stopped the sweep.
pub async fn sweep_expired_sessions(
    store: SessionMemoryStore,
    period: StdDuration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut ticks = tokio::time::interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("session sweep stopped");
                return Ok(());
            }
            _ = ticks.tick() => store.delete_expired().await?,
        }
    }
}

async fn pin_expiry(session: &Session, lifetime: Duration) -> anyhow::Result<()> {
    let created_at = if let Some(timestamp) = session.get::<i64>(CREATED_AT_KEY).await? {
        OffsetDateTime::from_unix_timestamp(timestamp)?
    } else {
        let now = OffsetDateTime::now_utc();
        session.insert(CREATED_AT_KEY, now.unix_timestamp()).await?;
        now
    };

    session.set_expiry(Some(Expiry::AtDateTime(created_at + lifetime)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{self, HeaderMap, StatusCode, header},
        middleware,
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;

    fn app(environment: Environment) -> Router {
        let config = SessionConfig::default();
        Router::new()
            .route("/read", get(|| async { "nothing written" }))
            .route(
                "/write",
                get(|session: Session| async move {
                    let visits = session.get::<u32>("visits").await.ok().flatten().unwrap_or(0);
                    session
                        .insert("visits", visits + 1)
                        .await
                        .map(|()| (visits + 1).to_string())
                        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
                }),
            )
            .layer(middleware::from_fn_with_state(
                session_lifetime(&config),
                pin_session_expiry,
            ))
            .layer(session_layer(SessionMemoryStore::new(), &config, environment))
    }

    fn set_cookie(headers: &HeaderMap) -> Option<String> {
        headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    }

    async fn get_with_cookie(app: &Router, path: &str, cookie: Option<&str>) -> HeaderMap {
        let mut request = http::Request::get(path);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("infallible");
        assert_eq!(response.status(), StatusCode::OK);
        response.headers().clone()
    }

    #[test]
    fn signing_key_is_deterministic() {
        assert_eq!(
            signing_key("secret").master(),
            signing_key("secret").master()
        );
        assert_ne!(signing_key("secret").master(), signing_key("other").master());
    }

    #[tokio::test]
    async fn no_cookie_without_write() {
        let app = app(Environment::Development);
        let headers = get_with_cookie(&app, "/read", None).await;
        assert!(set_cookie(&headers).is_none());
    }

    #[tokio::test]
    async fn cookie_flags_follow_environment() {
        let dev = set_cookie(&get_with_cookie(&app(Environment::Development), "/write", None).await)
            .expect("cookie");
        assert!(dev.starts_with("bizcore.sid="));
        assert!(dev.contains("HttpOnly"));
        assert!(!dev.contains("Secure"));

        let prod = set_cookie(&get_with_cookie(&app(Environment::Production), "/write", None).await)
            .expect("cookie");
        assert!(prod.contains("HttpOnly"));
        assert!(prod.contains("Secure"));
    }

    fn cookie_attr<'a>(cookie: &'a str, name: &str) -> Option<&'a str> {
        cookie
            .split("; ")
            .find_map(|attr| attr.strip_prefix(name)?.strip_prefix('='))
    }

    #[tokio::test]
    async fn expiry_does_not_slide() {
        let app = app(Environment::Development);

        let first = set_cookie(&get_with_cookie(&app, "/write", None).await).expect("cookie");
        let pair = first.split(';').next().expect("cookie pair").to_string();

        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

        let second = set_cookie(&get_with_cookie(&app, "/write", Some(&pair)).await)
            .expect("cookie refreshed on write");

        let max_age = |cookie: &str| {
            cookie_attr(cookie, "Max-Age").and_then(|v| v.parse::<i64>().ok())
        };
        match (max_age(&first), max_age(&second)) {
            (Some(first), Some(second)) => {
                assert!(second < 24 * 3600);
                assert!(second <= first);
            }
            _ => assert_eq!(
                cookie_attr(&first, "Expires"),
                cookie_attr(&second, "Expires")
            ),
        }
    }

    #[tokio::test]
    async fn sweep_deletes_expired_sessions_until_shutdown() {
        use tower_sessions::{
            session::{Id, Record},
            session_store::SessionStore,
        };

        let store = SessionMemoryStore::new();
        let mut expired = Record {
            id: Id::default(),
            data: std::collections::HashMap::default(),
            expiry_date: OffsetDateTime::now_utc() - Duration::seconds(1),
        };
        store.create(&mut expired).await.expect("create");

        let shutdown = CancellationToken::new();
        let sweep = tokio::spawn(sweep_expired_sessions(
            store.clone(),
            StdDuration::from_millis(10),
            shutdown.clone(),
        ));

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert!(store.is_empty());

        shutdown.cancel();
        sweep.await.expect("join").expect("sweep result");
    }
}

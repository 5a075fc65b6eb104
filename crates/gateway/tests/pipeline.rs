// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the request pipeline against a running server

mod fixtures;

use std::sync::Arc;

use axum::http::StatusCode;
use domain_services::ServiceRegistry;
use fixtures::{FailingProvider, PanickingProvider, SessionProvider, start_server};
use gateway::{Environment, ErrorEnvelope, ServerConfig, config::SessionConfig};
use shared_types::Domain;

const REQUEST_ID: &str = "x-request-id";

#[tokio::test]
async fn hundred_and_first_request_is_rate_limited() {
    let (server, addr) = fixtures::start_default_server().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/crm/ping");

    for n in 1..=100_u32 {
        let response = client.get(&url).send().await.expect("Failed to send request");
        assert_eq!(response.status(), StatusCode::OK, "request {n}");
        assert_eq!(
            response.headers()["ratelimit-remaining"],
            (100 - n).to_string().as_str()
        );
    }

    let response = client.get(&url).send().await.expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert!(!response.headers().contains_key("x-ratelimit-limit"));
    assert!(!response.headers().contains_key("x-ratelimit-remaining"));
    assert_eq!(
        response.text().await.expect("Failed to read response"),
        "Too many requests from this IP, please try again later."
    );

    // Infrastructure endpoints stay reachable for a limited client
    let health = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(health.status(), StatusCode::OK);

    server.shutdown().await;
}

async fn envelope_for(registry: ServiceRegistry, expected: StatusCode) {
    let (server, addr) = start_server(ServerConfig::for_testing(), registry).await;

    let response = reqwest::get(format!("http://{addr}/api/training/start"))
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), expected);

    let header = response.headers()[REQUEST_ID]
        .to_str()
        .expect("ascii header")
        .to_string();
    let envelope: ErrorEnvelope = response.json().await.expect("envelope body");

    assert_eq!(envelope.status, "error");
    assert_eq!(envelope.message, "Internal server error");
    assert_eq!(envelope.correlation_id, header);
    assert!(chrono::DateTime::parse_from_rfc3339(&envelope.timestamp).is_ok());

    // The process keeps serving after the failure
    let health = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("Failed to send request");
    assert_eq!(health.status(), StatusCode::OK);

    server.shutdown().await;
}

#[tokio::test]
async fn provider_panic_becomes_envelope() {
    let registry = ServiceRegistry::with_default_services()
        .with_provider(Domain::Training, Arc::new(PanickingProvider));
    envelope_for(registry, StatusCode::INTERNAL_SERVER_ERROR).await;
}

#[tokio::test]
async fn provider_error_becomes_envelope() {
    let registry = ServiceRegistry::with_default_services()
        .with_provider(Domain::Training, Arc::new(FailingProvider));
    envelope_for(registry, StatusCode::BAD_GATEWAY).await;
}

#[tokio::test]
async fn correlation_ids_are_unique_per_request() {
    let (server, addr) = fixtures::start_default_server().await;
    let client = reqwest::Client::new();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let response = client
            .get(format!("http://{addr}/api/ai/ping"))
            .header(REQUEST_ID, "replayed-id")
            .send()
            .await
            .expect("Failed to send request");
        let id = response.headers()[REQUEST_ID]
            .to_str()
            .expect("ascii header")
            .to_string();
        assert_ne!(id, "replayed-id");
        assert!(!ids.contains(&id));
        ids.push(id);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn session_round_trip() {
    let registry = ServiceRegistry::with_default_services()
        .with_provider(Domain::Crm, Arc::new(SessionProvider));
    let (server, addr) = start_server(ServerConfig::for_testing(), registry).await;
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .expect("client");

    let anonymous = client
        .get(format!("http://{addr}/api/crm/whoami"))
        .send()
        .await
        .expect("Failed to send request");
    assert!(!anonymous.headers().contains_key("set-cookie"));

    let login = client
        .get(format!("http://{addr}/api/crm/login"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(login.status(), StatusCode::NO_CONTENT);
    let cookie = login.headers()["set-cookie"].to_str().expect("ascii").to_string();
    assert!(cookie.contains("HttpOnly"));
    assert!(!cookie.contains("Secure"));

    let whoami: serde_json::Value = client
        .get(format!("http://{addr}/api/crm/whoami"))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("json");
    assert_eq!(whoami["user"], "ada");

    let logout = client
        .get(format!("http://{addr}/api/crm/logout"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(logout.status(), StatusCode::NO_CONTENT);

    let whoami: serde_json::Value = client
        .get(format!("http://{addr}/api/crm/whoami"))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("json");
    assert!(whoami["user"].is_null());

    server.shutdown().await;
}

#[tokio::test]
async fn production_cookie_is_secure() {
    let dist = tempfile::tempdir().expect("tempdir");
    std::fs::write(dist.path().join("index.html"), "<html>bizcore</html>").expect("index");

    let config = ServerConfig {
        environment: Environment::Production,
        client_dist_dir: dist.path().to_path_buf(),
        session: SessionConfig {
            secret: "a-production-secret-of-sufficient-length".to_string(),
            ..SessionConfig::default()
        },
        ..ServerConfig::for_testing()
    };
    let registry = ServiceRegistry::with_default_services()
        .with_provider(Domain::Crm, Arc::new(SessionProvider));
    let (server, addr) = start_server(config, registry).await;

    let login = reqwest::get(format!("http://{addr}/api/crm/login"))
        .await
        .expect("Failed to send request");
    let cookie = login.headers()["set-cookie"].to_str().expect("ascii").to_string();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));

    let page = reqwest::get(format!("http://{addr}/reports/quarterly"))
        .await
        .expect("Failed to send request");
    assert_eq!(page.status(), StatusCode::OK);
    assert_eq!(page.text().await.expect("body"), "<html>bizcore</html>");

    server.shutdown().await;
}

#[tokio::test]
async fn health_and_service_info() {
    let (server, addr) = fixtures::start_default_server().await;

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("json");
    assert_eq!(health["status"], "healthy");
    assert!(
        health["uptime"]
            .as_str()
            .is_some_and(|uptime| uptime.starts_with("0h 0m "))
    );

    let info: serde_json::Value = reqwest::get(format!("http://{addr}/api"))
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("json");
    assert_eq!(info["name"], "BizCore API");
    assert_eq!(info["endpoints"]["financial"], "/api/financial");

    let fallback: serde_json::Value = reqwest::get(format!("http://{addr}/settings"))
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("json");
    assert_eq!(fallback["client"], "http://localhost:5173");

    server.shutdown().await;
}

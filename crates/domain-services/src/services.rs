// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Built-in domain route providers
//!
//! The gateway treats these as opaque: it only mounts what [`RouteProvider::routes`]
//! returns. Each provider answers a liveness check and a short self-description;
//! the business endpoints of each domain live behind the same router.

use axum::{Json, Router, routing::get};
use route_provider::RouteProvider;
use serde_json::{Value, json};
use shared_types::Domain;

/// One route provider per business domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainService {
    /// Healthcare provider
    Healthcare,
    /// Training provider
    Training,
    /// Arbitration provider
    Arbiter,
    /// CRM provider
    Crm,
    /// Financial provider
    Financial,
    /// AI provider
    Ai,
    /// Dashboard provider
    Dashboard,
}

impl DomainService {
    /// Provider serving the given domain
    pub const fn for_domain(domain: Domain) -> Self {
        match domain {
            Domain::Healthcare => Self::Healthcare,
            Domain::Training => Self::Training,
            Domain::Arbiter => Self::Arbiter,
            Domain::Crm => Self::Crm,
            Domain::Financial => Self::Financial,
            Domain::Ai => Self::Ai,
            Domain::Dashboard => Self::Dashboard,
        }
    }

    /// Domain this provider serves
    pub const fn domain(self) -> Domain {
        match self {
            Self::Healthcare => Domain::Healthcare,
            Self::Training => Domain::Training,
            Self::Arbiter => Domain::Arbiter,
            Self::Crm => Domain::Crm,
            Self::Financial => Domain::Financial,
            Self::Ai => Domain::Ai,
            Self::Dashboard => Domain::Dashboard,
        }
    }

    /// Feature areas the provider covers
    pub const fn capabilities(self) -> &'static [&'static str] {
        match self {
            Self::Healthcare => &["patients", "appointments", "records"],
            Self::Training => &["courses", "enrollments", "sessions"],
            Self::Arbiter => &["cases", "hearings", "awards"],
            Self::Crm => &["contacts", "deals", "pipelines"],
            Self::Financial => &["invoices", "payments", "ledgers"],
            Self::Ai => &["assistants", "completions"],
            Self::Dashboard => &["overview", "widgets"],
        }
    }

    fn describe(self) -> Value {
        let domain = self.domain();
        json!({
            "domain": domain.slug(),
            "name": domain.name(),
            "capabilities": self.capabilities(),
        })
    }
}

impl RouteProvider for DomainService {
    fn name(&self) -> &'static str {
        self.domain().slug()
    }

    fn routes(&self) -> Router {
        let service = *self;

        Router::new()
            .route("/", get(move || async move { Json(service.describe()) }))
            .route(
                "/ping",
                get(move || async move {
                    Json(json!({
                        "domain": service.domain().slug(),
                        "status": "ok",
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    }))
                }),
            )
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn domain_round_trip() {
        for &domain in Domain::all() {
            assert_eq!(DomainService::for_domain(domain).domain(), domain);
            assert!(!DomainService::for_domain(domain).capabilities().is_empty());
        }
    }

    #[tokio::test]
    async fn ping_answers_with_domain() {
        let response = DomainService::Healthcare
            .routes()
            .oneshot(Request::get("/ping").body(Body::empty()).expect("request"))
            .await
            .expect("infallible");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["domain"], "healthcare");
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn root_describes_provider() {
        let response = DomainService::Crm
            .routes()
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("infallible");

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["name"], "CRM");
        assert_eq!(json["capabilities"][0], "contacts");
    }
}

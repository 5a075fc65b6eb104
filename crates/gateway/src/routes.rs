// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Routes module
//!
//! The router registry mounts route providers under their path prefixes,
//! adds the health, service info and metrics endpoints, and registers the
//! catch-all last.

pub mod handlers;

use std::sync::Arc;

use axum::{Router, routing::get};
use domain_services::ServiceRegistry;
use handlers::{catch_all_handler, health_handler, service_info_handler};
use route_provider::RouteProvider;
use tracing::debug;

use crate::{
    error::{ServerError, ServerResult},
    metrics::metrics_handler,
    state::ServerState,
};

/// Paths owned by the gateway itself
pub const RESERVED_PATHS: [&str; 3] = ["/health", "/api", "/metrics"];

/// A provider mounted under a path prefix
#[derive(Debug, Clone)]
pub struct RouteMount {
    /// Path prefix, e.g. `/api/crm`
    pub prefix: String,
    /// Provider answering every request under the prefix
    pub provider: Arc<dyn RouteProvider>,
}

/// Ordered collection of route mounts with distinct prefixes
#[derive(Debug, Default)]
pub struct RouterRegistry {
    mounts: Vec<RouteMount>,
}

impl RouterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount every provider of a service registry under its domain prefix
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if a prefix is invalid or mounted twice.
    pub fn from_services(services: &ServiceRegistry) -> ServerResult<Self> {
        let mut registry = Self::new();
        for (domain, provider) in services.iter() {
            registry.mount(domain.prefix(), Arc::clone(provider))?;
        }
        Ok(registry)
    }

    /// Mount a provider under a path prefix
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the prefix is malformed, reserved by
    /// the gateway, or already mounted.
    pub fn mount(
        &mut self,
        prefix: impl Into<String>,
        provider: Arc<dyn RouteProvider>,
    ) -> ServerResult<()> {
        let prefix = prefix.into();

        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            return Err(ServerError::Config {
                message: format!("invalid mount prefix {prefix:?}"),
            });
        }
        if RESERVED_PATHS.contains(&prefix.as_str()) {
            return Err(ServerError::Config {
                message: format!("mount prefix {prefix} is reserved"),
            });
        }
        if self.mounts.iter().any(|mount| mount.prefix == prefix) {
            return Err(ServerError::Config {
                message: format!("mount prefix {prefix} is already taken"),
            });
        }

        debug!(prefix = %prefix, provider = provider.name(), "mounting route provider");
        self.mounts.push(RouteMount { prefix, provider });
        Ok(())
    }

    /// Mounts in registration order
    pub fn mounts(&self) -> &[RouteMount] {
        &self.mounts
    }

    /// Build the application router
    ///
    /// The catch-all is registered after every mount so it only sees paths
    /// no provider or gateway endpoint claimed.
    pub fn into_router(self, state: ServerState) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/api", get(service_info_handler))
            .route("/metrics", get(metrics_handler));

        for RouteMount { prefix, provider } in self.mounts {
            router = router.nest_service(&prefix, provider.routes());
        }

        router.fallback(catch_all_handler).with_state(state)
    }
}

/// Create application routes from the service registry
///
/// # Errors
///
/// Returns `ServerError::Config` if two providers claim the same prefix.
pub fn create_routes(state: ServerState) -> ServerResult<Router> {
    let registry = RouterRegistry::from_services(state.registry())?;
    Ok(registry.into_router(state))
}

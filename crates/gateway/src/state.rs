// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Shared application state
//!
//! Handed to the gateway's own handlers; providers never see it.

use std::sync::Arc;

use domain_services::ServiceRegistry;
use tower_http::services::{ServeDir, ServeFile};

use crate::{config::ServerConfig, lifecycle::UptimeClock};

/// Pre-built client bundle with `index.html` as the fallback for unknown paths
pub type ClientBundle = ServeDir<ServeFile>;

/// State of the health, service info and catch-all handlers
#[derive(Debug, Clone)]
pub struct ServerState {
    config: Arc<ServerConfig>,
    registry: Arc<ServiceRegistry>,
    /// Start instant of the owning server instance
    uptime: UptimeClock,
    /// Present only in production
    client_bundle: Option<ClientBundle>,
}

impl ServerState {
    /// Build the state for one server instance
    ///
    /// The client bundle is resolved here, once, so a missing
    /// `client_dist_dir` only shows up as 404s from the catch-all.
    pub fn new(config: ServerConfig, registry: Arc<ServiceRegistry>, uptime: UptimeClock) -> Self {
        let client_bundle = config.environment.is_production().then(|| {
            let index = config.client_dist_dir.join("index.html");
            ServeDir::new(&config.client_dist_dir).fallback(ServeFile::new(index))
        });

        Self {
            config: Arc::new(config),
            registry,
            uptime,
            client_bundle,
        }
    }

    /// Gateway configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Mounted domain providers
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Uptime clock shared with the lifecycle manager
    pub fn uptime(&self) -> &UptimeClock {
        &self.uptime
    }

    /// Client bundle served by the catch-all route
    pub fn client_bundle(&self) -> Option<&ClientBundle> {
        self.client_bundle.as_ref()
    }
}

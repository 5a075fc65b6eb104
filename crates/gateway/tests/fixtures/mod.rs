// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Test fixtures for gateway integration tests
//!
//! This module provides route providers that fail in controlled ways and
//! helpers to run a real server on an ephemeral port.

#![allow(dead_code)]

pub mod providers;

use std::net::SocketAddr;

use domain_services::ServiceRegistry;
use gateway::{Server, ServerConfig, ShutdownConfig};

pub use providers::*;

/// Start a server on an ephemeral port
pub async fn start_server(config: ServerConfig, registry: ServiceRegistry) -> (Server, SocketAddr) {
    let server = Server::new(config, ShutdownConfig::default(), registry)
        .expect("Failed to create server");
    let addr = server.start().await.expect("Failed to start test server");
    (server, addr)
}

/// Start a server with the built-in providers and testing configuration
pub async fn start_default_server() -> (Server, SocketAddr) {
    start_server(
        ServerConfig::for_testing(),
        ServiceRegistry::with_default_services(),
    )
    .await
}

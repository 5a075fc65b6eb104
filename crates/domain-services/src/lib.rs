// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Domain route providers for the bizcore gateway
//!
//! This crate provides one [`RouteProvider`](route_provider::RouteProvider)
//! implementation per business domain, along with the registry the gateway
//! receives them through at construction time.
//!
//! # Architecture
//!
//! - **Providers**: [`services::DomainService`] - one variant per business domain
//! - **Registry Pattern**: [`registry::ServiceRegistry`] - explicit dependency container
//!   handed to the router registry and lifecycle manager, never looked up globally

pub mod registry;
pub mod services;

pub use registry::*;
pub use services::*;

// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! BizCore Gateway Implementation
//!
//! This crate provides the HTTP entry point of the BizCore business backend,
//! built with Axum. It mounts the domain route providers behind one ordered
//! request pipeline and owns the process lifecycle.
//!
//! # Module Structure
//!
//! - [`config`]: Server configuration and environment management with hierarchical loading
//! - [`error`]: Error types and the uniform error envelope
//! - [`correlation`]: Per-request correlation id, deadline and cancellation
//! - [`middleware`]: Security headers, rate limiting and the access log span
//! - [`session`]: Signed cookie sessions with a fixed lifetime
//! - [`error_boundary`]: Conversion of in-request failures into the envelope
//! - [`pipeline`]: Ordered composition of every middleware stage
//! - [`routes`]: Router registry, gateway endpoints and the catch-all
//! - [`state`]: Shared application state
//! - [`lifecycle`]: Lifecycle states, shutdown causes and the fatal error policy
//! - [`server`]: Lifecycle manager and coordinated graceful shutdown
//! - [`metrics`]: Prometheus metrics
//!
//! # Key Features
//!
//! - **Fixed Pipeline Order**: stages are composed in a single chain at build time
//! - **Graceful Shutdown**: drains in-flight requests with a bounded timeout, exactly once
//! - **Rate Limiting**: IP-based fixed-window limiting with standard `RateLimit` headers
//! - **Correlation**: every log line and error envelope of a request shares one id
//! - **Production Safety**: refuses the development session secret, secure cookies

pub mod config;
pub mod correlation;
pub mod error;
pub mod error_boundary;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;

pub use config::{Environment, ServerConfig};
pub use correlation::{CorrelationId, RequestContext};
pub use error::{ErrorEnvelope, ServerError, ServerResult};
pub use lifecycle::{FatalAction, FatalErrorPolicy, LifecycleState, ShutdownCause, Uptime};
pub use server::{Server, ShutdownConfig};
pub use shared_types::Domain;
pub use state::ServerState;

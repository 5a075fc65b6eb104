// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server implementation module
//!
//! This module provides the lifecycle manager of the gateway: it owns the
//! listening socket, walks the lifecycle states, listens for termination
//! signals and runs the graceful shutdown sequence exactly once, whether it
//! was triggered by a signal, a fatal failure or the embedding code.

use std::{
    future::Future,
    io,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::Router;
use domain_services::ServiceRegistry;
use futures_util::FutureExt;
use tokio::{
    net::TcpListener,
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
    error_boundary::panic_message,
    lifecycle::{
        EXIT_SUCCESS, FailureClass, FatalAction, LifecycleState, ShutdownCause, Uptime,
        UptimeClock,
    },
    metrics, pipeline,
    routes::create_routes,
    session::{SESSION_SWEEP_INTERVAL, SessionMemoryStore, sweep_expired_sessions},
    state::ServerState,
};

// Server constants
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SECONDS: u64 = 5;

/// Configuration for server shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to drain in-flight requests before abandoning them
    pub graceful_timeout: Duration,
    /// Maximum time to wait for the serve task after it was aborted
    pub force_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS),
            force_timeout: Duration::from_secs(DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

/// Main server struct
///
/// Cheap to clone; all clones drive the same instance.
#[derive(Debug, Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

#[derive(Debug)]
struct ServerInner {
    config: ServerConfig,
    shutdown_config: ShutdownConfig,
    /// Application router wrapped in the pipeline, built once
    router: Router,
    sessions: SessionMemoryStore,
    state: watch::Sender<LifecycleState>,
    uptime: UptimeClock,
    local_addr: OnceLock<SocketAddr>,
    started: AtomicBool,
    shutdown_started: AtomicBool,
    serve_task: Mutex<Option<JoinHandle<io::Result<()>>>>,
    /// Stops accepting connections and starts draining
    accept_token: CancellationToken,
    /// Parent of every request token, cancelled when draining times out
    abandon_token: CancellationToken,
    /// Cancelled once the shutdown sequence completed
    terminated: CancellationToken,
    exit_code: OnceLock<i32>,
}

impl Server {
    /// Create new server instance
    ///
    /// Builds the router and the request pipeline once; nothing is bound
    /// until [`Server::start`].
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the configuration is invalid or two
    /// providers claim the same prefix.
    pub fn new(
        config: ServerConfig,
        shutdown_config: ShutdownConfig,
        registry: ServiceRegistry,
    ) -> ServerResult<Self> {
        config.validate()?;

        let accept_token = CancellationToken::new();
        let abandon_token = CancellationToken::new();
        let uptime = UptimeClock::new();

        let sessions = SessionMemoryStore::new();

        let state = ServerState::new(config.clone(), Arc::new(registry), uptime.clone());
        let router = pipeline::build(
            create_routes(state)?,
            &config,
            abandon_token.clone(),
            sessions.clone(),
        )?;

        metrics::set_lifecycle_state(LifecycleState::Stopped);
        let (state, _) = watch::channel(LifecycleState::Stopped);

        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                shutdown_config,
                router,
                sessions,
                state,
                uptime,
                local_addr: OnceLock::new(),
                started: AtomicBool::new(false),
                shutdown_started: AtomicBool::new(false),
                serve_task: Mutex::new(None),
                accept_token,
                abandon_token,
                terminated: CancellationToken::new(),
                exit_code: OnceLock::new(),
            }),
        })
    }

    /// Bind the listening socket and start serving
    ///
    /// Records the start instant, spawns the serve task and the signal
    /// watcher, and returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address
    /// (the instance is then `Failed`), or `ServerError::Lifecycle` if the
    /// instance was started before or its shutdown sequence already began.
    pub async fn start(&self) -> ServerResult<SocketAddr> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ServerError::Lifecycle {
                message: "server instance was already started".to_string(),
            });
        }
        if self.inner.shutdown_started.load(Ordering::Acquire) {
            return Err(shutdown_before_start());
        }
        self.transition(LifecycleState::Starting);

        let addr = self.inner.config.socket_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                error!(address = %addr, error = %source, "failed to bind listening socket");
                self.transition(LifecycleState::Failed);
                return Err(ServerError::Bind {
                    address: addr,
                    source,
                });
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(source) => {
                self.transition(LifecycleState::Failed);
                return Err(ServerError::Startup { source });
            }
        };
        let _ = self.inner.local_addr.set(local_addr);

        let accept_token = self.inner.accept_token.clone();
        let app = self
            .inner
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let serve_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { accept_token.cancelled().await })
                .await
        });
        {
            // `stop` takes the task under the same lock, so a shutdown that
            // began before this point never sees it and has to be honored here.
            let mut slot = self.inner.serve_task.lock().await;
            if self.inner.shutdown_started.load(Ordering::Acquire) {
                drop(slot);
                self.inner.accept_token.cancel();
                if let Err(e) = serve_task.await {
                    warn!(error = %e, "serve task failed while closing an unstarted server");
                }
                self.transition(LifecycleState::Stopped);
                return Err(shutdown_before_start());
            }
            *slot = Some(serve_task);
        }

        self.inner.uptime.mark_started();
        self.spawn_signal_watcher();
        self.spawn_supervised(
            "session-sweep",
            sweep_expired_sessions(
                self.inner.sessions.clone(),
                SESSION_SWEEP_INTERVAL,
                self.inner.terminated.clone(),
            ),
        );

        let running = self.inner.state.send_if_modified(|state| {
            let starting = *state == LifecycleState::Starting;
            if starting {
                *state = LifecycleState::Running;
            }
            starting
        });
        if running {
            metrics::set_lifecycle_state(LifecycleState::Running);
        }

        info!(
            address = %local_addr,
            environment = %self.inner.config.environment,
            "gateway listening",
        );
        Ok(local_addr)
    }

    /// Stop accepting connections and drain in-flight requests
    ///
    /// Waits up to the graceful timeout, then abandons whatever is still
    /// running. Returns whether this call closed the listener; calls on an
    /// instance that is not serving are no-ops.
    pub async fn stop(&self) -> bool {
        let Some(mut serve_task) = self.inner.serve_task.lock().await.take() else {
            debug!("stop requested but the server is not serving");
            return false;
        };

        self.transition(LifecycleState::ShuttingDown);
        info!("closing listener, draining in-flight requests");
        self.inner.accept_token.cancel();

        let graceful_timeout = self.inner.shutdown_config.graceful_timeout;
        match tokio::time::timeout(graceful_timeout, &mut serve_task).await {
            Ok(Ok(Ok(()))) => info!("in-flight requests drained"),
            Ok(Ok(Err(e))) => error!(error = %e, "server error while draining"),
            Ok(Err(e)) => error!(error = %e, "serve task failed while draining"),
            Err(_) => {
                warn!(
                    timeout_secs = graceful_timeout.as_secs(),
                    "drain timeout elapsed, abandoning in-flight requests"
                );
                self.inner.abandon_token.cancel();
                serve_task.abort();
                if tokio::time::timeout(self.inner.shutdown_config.force_timeout, serve_task)
                    .await
                    .is_err()
                {
                    error!("serve task did not stop after abort");
                }
            }
        }

        self.transition(LifecycleState::Stopped);
        true
    }

    /// Run the shutdown sequence once
    ///
    /// Only the first caller runs it and gets the process exit code; every
    /// concurrent or later call returns `None` immediately.
    pub async fn graceful_shutdown(&self, cause: ShutdownCause) -> Option<i32> {
        if self.inner.shutdown_started.swap(true, Ordering::AcqRel) {
            debug!(cause = %cause, "graceful shutdown already in progress");
            return None;
        }

        let exit_code = cause.exit_code();
        if matches!(cause, ShutdownCause::Fatal { .. }) {
            error!(cause = %cause, "initiating graceful shutdown");
        } else {
            warn!(cause = %cause, "initiating graceful shutdown");
        }

        self.stop().await;

        info!(exit_code, "Graceful shutdown completed");
        let _ = self.inner.exit_code.set(exit_code);
        self.inner.terminated.cancel();
        Some(exit_code)
    }

    /// Programmatic shutdown request
    pub async fn shutdown(&self) -> Option<i32> {
        info!("programmatic shutdown requested");
        self.graceful_shutdown(ShutdownCause::Requested).await
    }

    /// Wait until the shutdown sequence completed and return the exit code
    pub async fn wait_for_termination(&self) -> i32 {
        self.inner.terminated.cancelled().await;
        self.inner.exit_code.get().copied().unwrap_or(EXIT_SUCCESS)
    }

    /// Start the server and block until it terminated
    ///
    /// # Errors
    ///
    /// Returns the startup error if the server could not start.
    pub async fn run(&self) -> ServerResult<i32> {
        self.start().await?;
        Ok(self.wait_for_termination().await)
    }

    /// Spawn a background task whose failure is a process-level failure
    ///
    /// Errors and panics are routed through the configured fatal error policy.
    pub fn spawn_supervised<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let server = self.clone();
        tokio::spawn(async move {
            let (class, message) = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!(task = name, "supervised task finished");
                    return;
                }
                Ok(Err(e)) => (FailureClass::TaskFailure, format!("{name}: {e:#}")),
                Err(panic) => (
                    FailureClass::Panic,
                    format!("{name}: {}", panic_message(panic.as_ref())),
                ),
            };
            server.report_failure(class, message).await;
        })
    }

    /// Apply the fatal error policy to a process-level failure
    ///
    /// Returns the exit code if this report ran the shutdown sequence.
    pub async fn report_failure(&self, class: FailureClass, message: String) -> Option<i32> {
        match self.inner.config.fatal_policy.action_for(class) {
            FatalAction::LogAndContinue => {
                error!(class = %class, detail = %message, "process-level failure, continuing");
                None
            }
            FatalAction::Shutdown => {
                self.graceful_shutdown(ShutdownCause::Fatal { class, message })
                    .await
            }
        }
    }

    /// Time since the server started accepting connections
    pub fn uptime(&self) -> Uptime {
        self.inner.uptime.uptime()
    }

    /// Session store behind the session stage
    pub fn sessions(&self) -> &SessionMemoryStore {
        &self.inner.sessions
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every lifecycle transition
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    /// Address the listener was bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.inner.state.send_replace(next);
        metrics::set_lifecycle_state(next);
        debug!(from = %previous, to = %next, "lifecycle transition");
    }

    fn spawn_signal_watcher(&self) {
        let server = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = shutdown_signal() => match signal {
                    Ok(name) => {
                        server.graceful_shutdown(ShutdownCause::Signal(name)).await;
                    }
                    Err(e) => {
                        server
                            .report_failure(FailureClass::TaskFailure, e.to_string())
                            .await;
                    }
                },
                () = server.inner.terminated.cancelled() => {
                    debug!("server terminated, signal watcher exiting");
                }
            }
        });
    }
}

fn shutdown_before_start() -> ServerError {
    ServerError::Lifecycle {
        message: "shutdown began before the server started".to_string(),
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM and return the signal name
async fn shutdown_signal() -> ServerResult<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let register = |kind: SignalKind, name: &str| {
            signal(kind).map_err(|e| ServerError::Signal {
                message: format!("failed to register {name} handler: {e}"),
            })
        };
        let mut sigterm = register(SignalKind::terminate(), "SIGTERM")?;
        let mut sigint = register(SignalKind::interrupt(), "SIGINT")?;

        tokio::select! {
            _ = sigterm.recv() => {
                warn!("Received SIGTERM signal, initiating graceful shutdown");
                Ok("SIGTERM")
            },
            _ = sigint.recv() => {
                warn!("Received SIGINT signal, initiating graceful shutdown");
                Ok("SIGINT")
            },
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ServerError::Signal {
                message: format!("failed to install CTRL+C handler: {e}"),
            })?;
        warn!("Received CTRL+C signal, initiating graceful shutdown");
        Ok("CTRL+C")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Environment, ServerPort},
        lifecycle::{EXIT_FAILURE, FatalErrorPolicy},
    };

    fn server(config: ServerConfig) -> Server {
        Server::new(
            config,
            ShutdownConfig::default(),
            ServiceRegistry::with_default_services(),
        )
        .expect("server")
    }

    #[tokio::test]
    async fn server_creation() {
        let server = server(ServerConfig::for_testing());
        assert_eq!(server.config().environment, Environment::Testing);
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert_eq!(server.uptime().to_string(), "0h 0m 0s");
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn start_then_stop() {
        let server = server(ServerConfig::for_testing());

        let addr = server.start().await.expect("start");
        assert_ne!(addr.port(), 0);
        assert_eq!(server.state(), LifecycleState::Running);
        assert_eq!(server.local_addr(), Some(addr));

        assert!(server.stop().await);
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert!(!server.stop().await);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let server = server(ServerConfig::for_testing());
        server.start().await.expect("start");

        let err = server.start().await.expect_err("second start");
        assert!(matches!(err, ServerError::Lifecycle { .. }));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_before_start_keeps_the_server_down() {
        let server = server(ServerConfig::for_testing());

        assert_eq!(server.shutdown().await, Some(EXIT_SUCCESS));

        let err = server.start().await.expect_err("start after shutdown");
        assert!(matches!(err, ServerError::Lifecycle { .. }));
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert!(server.local_addr().is_none());
        assert_eq!(server.wait_for_termination().await, EXIT_SUCCESS);
    }

    #[tokio::test]
    async fn session_sweep_runs_while_serving() {
        use tower_sessions::{
            cookie::time::{Duration as CookieDuration, OffsetDateTime},
            session::{Id, Record},
            session_store::SessionStore,
        };

        let server = server(ServerConfig::for_testing());
        let mut expired = Record {
            id: Id::default(),
            data: std::collections::HashMap::default(),
            expiry_date: OffsetDateTime::now_utc() - CookieDuration::seconds(1),
        };
        server.sessions().create(&mut expired).await.expect("create");
        assert_eq!(server.sessions().len(), 1);

        server.start().await.expect("start");
        // The first sweep tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(server.sessions().is_empty());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn bind_failure_marks_failed() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = occupied.local_addr().expect("addr").port();

        let server = server(ServerConfig {
            port: ServerPort::new(port, Environment::Testing).expect("port"),
            ..ServerConfig::for_testing()
        });

        let err = server.start().await.expect_err("port in use");
        assert!(matches!(err, ServerError::Bind { .. }));
        assert_eq!(server.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn concurrent_shutdowns_run_once() {
        let server = server(ServerConfig::for_testing());
        server.start().await.expect("start");

        let (first, second) = tokio::join!(
            server.graceful_shutdown(ShutdownCause::Signal("SIGTERM")),
            server.graceful_shutdown(ShutdownCause::Signal("SIGINT")),
        );

        assert_eq!(
            [first, second].iter().filter(|code| code.is_some()).count(),
            1
        );
        assert_eq!(first.or(second), Some(EXIT_SUCCESS));
        assert_eq!(server.wait_for_termination().await, EXIT_SUCCESS);
        assert_eq!(server.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn supervised_failure_shuts_down_with_failure_code() {
        let server = server(ServerConfig::for_testing());
        server.start().await.expect("start");

        server
            .spawn_supervised("ledger-sync", async { Err(anyhow::anyhow!("ledger unreachable")) })
            .await
            .expect("join");

        assert_eq!(server.wait_for_termination().await, EXIT_FAILURE);
        assert_eq!(server.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn supervised_failure_can_be_tolerated() {
        let server = server(ServerConfig {
            fatal_policy: FatalErrorPolicy {
                task_failure: FatalAction::LogAndContinue,
                ..FatalErrorPolicy::default()
            },
            ..ServerConfig::for_testing()
        });
        server.start().await.expect("start");

        server
            .spawn_supervised("report-export", async { Err(anyhow::anyhow!("disk full")) })
            .await
            .expect("join");

        assert_eq!(server.state(), LifecycleState::Running);
        assert_eq!(server.shutdown().await, Some(EXIT_SUCCESS));
    }

    #[tokio::test]
    async fn shutdown_config_default() {
        let config = ShutdownConfig::default();
        assert_eq!(
            config.graceful_timeout,
            Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.force_timeout,
            Duration::from_secs(DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SECONDS)
        );
    }
}

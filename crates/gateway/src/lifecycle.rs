// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle vocabulary
//!
//! States of the server instance, shutdown causes with their exit codes, the
//! configurable severity mapping for process-level failures, and the uptime
//! clock shared between the lifecycle manager and the health endpoint.

use std::{
    fmt,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Exit code for deliberate, signal-triggered shutdowns
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for shutdowns caused by a failure
pub const EXIT_FAILURE: i32 = 1;

/// State of the server instance
///
/// `Stopped → Starting → Running → ShuttingDown → Stopped`, with `Failed`
/// reachable from `Starting` when the listening socket cannot be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Not serving; initial and terminal state
    Stopped,
    /// Binding the listening socket
    Starting,
    /// Accepting connections
    Running,
    /// No longer accepting, draining in-flight requests
    ShuttingDown,
    /// Startup failed; terminal
    Failed,
}

impl LifecycleState {
    /// Numeric encoding used for the lifecycle gauge
    pub const fn as_gauge(self) -> i64 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::ShuttingDown => 3,
            Self::Failed => 4,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Classes of failure that happen outside any single request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// A supervised task panicked
    Panic,
    /// A supervised task returned an error
    TaskFailure,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic => f.write_str("panic"),
            Self::TaskFailure => f.write_str("task_failure"),
        }
    }
}

/// What to do when a failure class is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalAction {
    /// Run the graceful shutdown sequence and exit non-zero
    Shutdown,
    /// Log the failure and keep serving
    LogAndContinue,
}

/// Severity mapping from failure class to action
///
/// Defaults to shutting down for every class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FatalErrorPolicy {
    /// Action for panics in supervised tasks
    pub panic: FatalAction,
    /// Action for errors returned by supervised tasks
    pub task_failure: FatalAction,
}

impl FatalErrorPolicy {
    /// Action configured for a failure class
    pub fn action_for(&self, class: FailureClass) -> FatalAction {
        match class {
            FailureClass::Panic => self.panic,
            FailureClass::TaskFailure => self.task_failure,
        }
    }
}

impl Default for FatalErrorPolicy {
    fn default() -> Self {
        Self {
            panic: FatalAction::Shutdown,
            task_failure: FatalAction::Shutdown,
        }
    }
}

/// Why the graceful shutdown sequence was entered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// Termination signal such as SIGTERM or SIGINT
    Signal(&'static str),
    /// Programmatic request from the embedding code
    Requested,
    /// Process-level failure mapped to `FatalAction::Shutdown`
    Fatal {
        /// Failure class
        class: FailureClass,
        /// Failure detail, for logs only
        message: String,
    },
}

impl ShutdownCause {
    /// Process exit code for this cause
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Signal(_) | Self::Requested => EXIT_SUCCESS,
            Self::Fatal { .. } => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "received {name}"),
            Self::Requested => f.write_str("shutdown requested"),
            Self::Fatal { class, message } => write!(f, "fatal {class}: {message}"),
        }
    }
}

/// Records when the server started accepting connections
#[derive(Debug, Clone, Default)]
pub struct UptimeClock {
    started_at: Arc<OnceLock<Instant>>,
}

impl UptimeClock {
    /// Create a clock that has not started yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start instant; later calls keep the first value
    pub fn mark_started(&self) {
        let _ = self.started_at.set(Instant::now());
    }

    /// Whether the start instant was recorded
    pub fn is_started(&self) -> bool {
        self.started_at.get().is_some()
    }

    /// Elapsed time since start, zero before start
    pub fn uptime(&self) -> Uptime {
        Uptime(
            self.started_at
                .get()
                .map_or(Duration::ZERO, Instant::elapsed),
        )
    }
}

/// Elapsed running time, displayed as `"{h}h {m}m {s}s"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Uptime(pub Duration);

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0.as_secs();
        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;
        write!(f, "{hours}h {minutes}m {seconds}s")
    }
}

//! Session Lifecycle
//!
//! The lifecycle state machine of a stream session and the running flag
//! shared between the caller and the background read loop.
//!
//! ```text
//! Idle ──start()──► Connecting ──greeting──► Running ──stop()──► Stopping ──loop exit──► Closed
//!                       │                                                                  │
//!                       └──────────────────── connect failure ─────────────────────────────┤
//!                                                                                          │
//!                      Connecting ◄────────────────── start() ─────────────────────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Constructed, no socket.
    #[default]
    Idle,
    /// `start()` is opening the transport and waiting for the greeting.
    Connecting,
    /// The read loop is active.
    Running,
    /// Stop requested; the read loop is finishing its current iteration.
    Stopping,
    /// Socket released. A new `start()` may follow.
    Closed,
}

impl SessionState {
    /// Whether `start()` may be called in this state.
    #[must_use]
    pub const fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }

    /// Whether a connection attempt or read loop is in progress.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Running | Self::Stopping)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
        }
    }
}

/// State cell shared by the session handle and its read loop.
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<RwLock<SessionState>>);

impl SharedState {
    /// Current state.
    #[must_use]
    pub fn get(&self) -> SessionState {
        *self.0.read()
    }

    /// Unconditionally move to `state`.
    pub fn set(&self, state: SessionState) {
        *self.0.write() = state;
    }

    /// Move to `to` only when currently in `from`. Returns whether it moved.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut current = self.0.write();
        if *current == from {
            *current = to;
            true
        } else {
            false
        }
    }

    /// Atomically claim the `Connecting` state if a start is allowed.
    ///
    /// # Errors
    ///
    /// Returns the current state if the session is already active.
    pub fn begin_connecting(&self) -> Result<(), SessionState> {
        let mut current = self.0.write();
        if current.can_start() {
            *current = SessionState::Connecting;
            Ok(())
        } else {
            Err(*current)
        }
    }
}

// =============================================================================
// Running Flag
// =============================================================================

/// Cooperative liveness latch for the read loop.
///
/// The boolean is the source of truth and is checked once per loop
/// iteration. Each `raise()` also installs a fresh cancellation token that
/// `lower()` cancels, so a receive parked on the socket can be woken
/// instead of waiting for its timeout.
#[derive(Debug, Clone, Default)]
pub struct RunningFlag {
    inner: Arc<RunningFlagInner>,
}

#[derive(Debug, Default)]
struct RunningFlagInner {
    running: AtomicBool,
    token: Mutex<CancellationToken>,
}

impl RunningFlag {
    /// Create a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the read loop should keep going.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Set the flag and return the token of this run.
    ///
    /// The token is swapped and the flag set under one lock, so a concurrent
    /// [`lower`](Self::lower) either sees the new run or cancels it whole.
    pub fn raise(&self) -> CancellationToken {
        let mut current = self.inner.token.lock();
        let token = CancellationToken::new();
        *current = token.clone();
        self.inner.running.store(true, Ordering::SeqCst);
        token
    }

    /// Clear the flag and cancel the current run's token. Idempotent.
    ///
    /// Returns whether the flag was set before the call.
    pub fn lower(&self) -> bool {
        let current = self.inner.token.lock();
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        current.cancel();
        was_running
    }
}

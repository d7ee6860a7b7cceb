//! One in-flight secondary-channel exchange.
//!
//! ```text
//!  Created ──► Connecting ──► AwaitingReply ──► Settled(ok | failed) ──► Closed
//!                  │                                  ▲
//!                  └──────── connection error ────────┘
//! ```
//!
//! The session owns the [`Completer`] of its outcome. Settlement and the
//! phase change happen under one lock, so the phase always reflects the
//! winning completion and losers leave no trace.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CompanionError, FailureDescriptor};
use crate::latch::{Completer, Settlement, completion};

pub type HandoffOutcome = Result<String, FailureDescriptor>;

// ── HandoffPhase ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandoffPhase {
    #[default]
    Created,
    Connecting,
    AwaitingReply,
    Settled {
        success: bool,
    },
    Closed,
}

impl std::fmt::Display for HandoffPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::AwaitingReply => write!(f, "AwaitingReply"),
            Self::Settled { success: true } => write!(f, "Settled(success)"),
            Self::Settled { success: false } => write!(f, "Settled(failure)"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl HandoffPhase {
    fn is_pending(&self) -> bool {
        matches!(self, Self::Created | Self::Connecting | Self::AwaitingReply)
    }
}

// ── HandoffSession ───────────────────────────────────────────────

pub struct HandoffSession {
    endpoint: String,
    phase: Mutex<HandoffPhase>,
    completer: Completer<HandoffOutcome>,
    settled: CancellationToken,
}

impl HandoffSession {
    /// Start a session towards `endpoint`.
    ///
    /// Fails with an invalid-argument failure on an empty endpoint name.
    pub fn new(
        endpoint: impl Into<String>,
    ) -> Result<(Self, Settlement<HandoffOutcome>), FailureDescriptor> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(FailureDescriptor::invalid_argument(
                "Invalid argument: secondary endpoint name is required",
            ));
        }
        let (completer, settlement) = completion();
        let session = Self {
            endpoint,
            phase: Mutex::new(HandoffPhase::default()),
            completer,
            settled: CancellationToken::new(),
        };
        Ok((session, settlement))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn phase(&self) -> HandoffPhase {
        self.lock().clone()
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Created`.
    pub fn begin_connect(&self) -> Result<(), CompanionError> {
        let mut phase = self.lock();
        match *phase {
            HandoffPhase::Created => {
                *phase = HandoffPhase::Connecting;
                Ok(())
            }
            _ => Err(CompanionError::InvalidTransition(
                "cannot connect: handoff not in Created state",
            )),
        }
    }

    /// Valid from: `Connecting`. Fails if a completion already settled
    /// the session while it was connecting.
    pub fn begin_await_reply(&self) -> Result<(), CompanionError> {
        let mut phase = self.lock();
        match *phase {
            HandoffPhase::Connecting => {
                *phase = HandoffPhase::AwaitingReply;
                Ok(())
            }
            _ => Err(CompanionError::InvalidTransition(
                "cannot await reply: handoff not in Connecting state",
            )),
        }
    }

    /// Offer an outcome. Returns `true` only for the completion that won.
    pub fn settle(&self, outcome: HandoffOutcome) -> bool {
        let mut phase = self.lock();
        if !phase.is_pending() {
            debug!(endpoint = %self.endpoint, phase = %*phase, "late completion discarded");
            return false;
        }
        let success = outcome.is_ok();
        if !self.completer.settle(outcome) {
            return false;
        }
        *phase = HandoffPhase::Settled { success };
        drop(phase);
        self.settled.cancel();
        true
    }

    pub fn is_settled(&self) -> bool {
        self.settled.is_cancelled()
    }

    /// Resolves once any completion has settled the session.
    pub async fn settled(&self) {
        self.settled.cancelled().await
    }

    /// Transition to `Closed`. Always succeeds; a session closed before
    /// settling is settled with an internal failure first.
    pub fn close(&self) {
        if !self.is_settled() {
            self.settle(Err(FailureDescriptor::internal(
                "handoff session closed before settlement",
            )));
        }
        *self.lock() = HandoffPhase::Closed;
    }

    fn lock(&self) -> MutexGuard<'_, HandoffPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for HandoffSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffSession")
            .field("endpoint", &self.endpoint)
            .field("phase", &self.phase())
            .finish()
    }
}

//! Scoped call wrapper.
//!
//! Every call runs inside [`with_autocleanup`]. The work closure receives a
//! [`TeardownContext`] on which it registers cleanup actions as it acquires
//! resources. Once the work finishes, fails, or is cancelled, the actions
//! run in reverse registration order, each exactly once, and only then is
//! the outcome handed back. A failing cleanup is logged and never replaces
//! the work's own result.
//!
//! ```text
//!   acquire ──► attach cleanup ──► work ──┬─► Ok / Err ──┐
//!                                         └─► cancelled ─┴─► drain (LIFO) ─► outcome
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CompanionError, FailureDescriptor};

pub type CleanupFuture = Pin<Box<dyn Future<Output = Result<(), CompanionError>> + Send>>;
type CleanupAction = Box<dyn FnOnce() -> CleanupFuture + Send>;

struct Entry {
    label: String,
    action: CleanupAction,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    draining: bool,
}

// ── TeardownContext ──────────────────────────────────────────────

/// Ordered list of cleanup actions owned by one call.
///
/// Cloning yields another handle to the same list; contexts of different
/// calls never share state.
#[derive(Clone, Default)]
pub struct TeardownContext {
    inner: Arc<Mutex<Inner>>,
}

impl TeardownContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async cleanup action.
    ///
    /// Actions registered after the context started draining (for example
    /// from a task that outlived the call) are run right away on the
    /// current runtime instead of being queued.
    pub fn add_cleanup<F, Fut>(&self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CompanionError>> + Send + 'static,
    {
        let entry = Entry {
            label: label.into(),
            action: Box::new(move || Box::pin(action())),
        };

        let mut inner = self.lock();
        if !inner.draining {
            inner.entries.push(entry);
            return;
        }
        drop(inner);

        debug!(cleanup = %entry.label, "late cleanup registration; running now");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_entry(entry));
            }
            Err(_) => warn!(cleanup = %entry.label, "no runtime for late cleanup; dropped"),
        }
    }

    /// Register a synchronous cleanup action.
    pub fn defer<F>(&self, label: impl Into<String>, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_cleanup(label, move || async move {
            action();
            Ok(())
        });
    }

    /// Number of actions still waiting to run.
    pub fn pending(&self) -> usize {
        self.lock().entries.len()
    }

    /// Run every queued action, most recent first. Returns how many ran.
    ///
    /// Safe to call more than once: each action is popped before it runs,
    /// so a second drain only sees what the first one did not reach.
    pub async fn drain(&self) -> usize {
        self.lock().draining = true;
        let mut ran = 0;
        loop {
            let next = self.lock().entries.pop();
            let Some(entry) = next else { break };
            run_entry(entry).await;
            ran += 1;
        }
        ran
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TeardownContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("TeardownContext")
            .field("pending", &inner.entries.len())
            .field("draining", &inner.draining)
            .finish()
    }
}

async fn run_entry(entry: Entry) {
    match (entry.action)().await {
        Ok(()) => debug!(cleanup = %entry.label, "cleanup done"),
        Err(e) => warn!(cleanup = %entry.label, error = %e, "cleanup action failed"),
    }
}

// ── DrainGuard ───────────────────────────────────────────────────

/// Drains the context from a detached task if the wrapper future itself is
/// dropped before it could drain inline.
struct DrainGuard {
    context: Option<TeardownContext>,
}

impl DrainGuard {
    fn disarm(mut self) {
        self.context = None;
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    context.drain().await;
                });
            }
            Err(_) => warn!(
                pending = context.pending(),
                "scope dropped outside a runtime; cleanup skipped"
            ),
        }
    }
}

// ── Wrappers ─────────────────────────────────────────────────────

/// Run `work` in a fresh scope tied to `cancel`.
///
/// Cancellation wins over in-flight work: the work future is dropped, the
/// scope drains, and the call fails with a cancelled failure.
pub async fn with_autocleanup<T, F, Fut>(
    cancel: &CancellationToken,
    work: F,
) -> Result<T, FailureDescriptor>
where
    F: FnOnce(TeardownContext) -> Fut,
    Fut: Future<Output = Result<T, FailureDescriptor>>,
{
    let context = TeardownContext::new();
    let guard = DrainGuard {
        context: Some(context.clone()),
    };

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FailureDescriptor::cancelled()),
        result = work(context.clone()) => result,
    };

    let ran = context.drain().await;
    guard.disarm();
    debug!(cleanups = ran, ok = outcome.is_ok(), "scope released");
    outcome
}

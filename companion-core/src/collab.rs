//! Collaborators the gateway is constructed with.
//!
//! The device work itself lives behind these traits; the core only routes,
//! scopes, translates and reports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::Level;

use crate::call::{CallScope, RequestStream, ResponseSink};
use crate::error::FailureDescriptor;
use crate::handoff::{HandoffBridge, SurfaceHandle};
use crate::operation::Operation;
use crate::status::StatusCode;

// ── Logger ───────────────────────────────────────────────────────

pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }
}

/// Forwards to `tracing`, tagged with the logger's name.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    name: String,
}

impl TracingLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        let logger = self.name.as_str();
        match level {
            Level::ERROR => tracing::error!(logger, "{message}"),
            Level::WARN => tracing::warn!(logger, "{message}"),
            Level::INFO => tracing::info!(logger, "{message}"),
            Level::DEBUG => tracing::debug!(logger, "{message}"),
            _ => tracing::trace!(logger, "{message}"),
        }
    }
}

// ── Target ───────────────────────────────────────────────────────

/// The device the companion is attached to.
pub trait Target: Send + Sync {
    fn udid(&self) -> &str;

    /// The target's own logger, if one is attached.
    fn logger(&self) -> Option<Arc<dyn Logger>>;
}

// ── CommandExecutor ──────────────────────────────────────────────

/// Performs device work. Every operation defaults to unsupported so an
/// executor implements only what its target can do.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// The target's main-screen frame-buffer handle.
    async fn main_screen_surface(&self) -> Result<SurfaceHandle, FailureDescriptor> {
        Err(FailureDescriptor::unsupported(
            "Target doesn't support framebuffer access",
        ))
    }

    async fn unary(
        &self,
        operation: Operation,
        _request: Bytes,
        _scope: &CallScope,
    ) -> Result<Bytes, FailureDescriptor> {
        Err(unsupported(operation))
    }

    async fn client_stream(
        &self,
        operation: Operation,
        _requests: &mut RequestStream,
        _scope: &CallScope,
    ) -> Result<Bytes, FailureDescriptor> {
        Err(unsupported(operation))
    }

    async fn server_stream(
        &self,
        operation: Operation,
        _request: Bytes,
        _responses: &ResponseSink,
        _scope: &CallScope,
    ) -> Result<(), FailureDescriptor> {
        Err(unsupported(operation))
    }

    async fn bidi_stream(
        &self,
        operation: Operation,
        _requests: &mut RequestStream,
        _responses: &ResponseSink,
        _scope: &CallScope,
    ) -> Result<(), FailureDescriptor> {
        Err(unsupported(operation))
    }
}

fn unsupported(operation: Operation) -> FailureDescriptor {
    FailureDescriptor::unsupported(format!("{operation} is not supported by this executor"))
}

// ── EventReporter ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEventKind {
    Started,
    Finished { code: StatusCode, duration: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub call_id: u64,
    pub operation: Operation,
    pub kind: CallEventKind,
}

/// Sink for per-call lifecycle events.
pub trait EventReporter: Send + Sync {
    fn report(&self, event: &CallEvent);
}

/// Logs call events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl EventReporter for TracingReporter {
    fn report(&self, event: &CallEvent) {
        match &event.kind {
            CallEventKind::Started => {
                tracing::debug!(call_id = event.call_id, operation = %event.operation, "call started")
            }
            CallEventKind::Finished { code, duration } => tracing::info!(
                call_id = event.call_id,
                operation = %event.operation,
                %code,
                elapsed_ms = duration.as_millis() as u64,
                "call finished"
            ),
        }
    }
}

// ── Collaborators ────────────────────────────────────────────────

/// Everything a handler constructor may draw on.
#[derive(Clone)]
pub struct Collaborators {
    pub target: Arc<dyn Target>,
    pub executor: Arc<dyn CommandExecutor>,
    pub reporter: Arc<dyn EventReporter>,
    pub logger: Arc<dyn Logger>,
    /// Secondary channel used to hand frame buffers to other processes.
    pub handoff: HandoffBridge,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("target", &self.target.udid())
            .finish_non_exhaustive()
    }
}

//! Table-driven dispatch.
//!
//! Every operation is one row in a [`HandlerTable`]: a constructor that
//! builds the handler from the gateway's [`Collaborators`]. [`Gateway::dispatch`]
//! is the single path every call takes:
//!
//! ```text
//!  Started ─► scope ─► construct ─► execute ─► drain ─► translate ─► Finished
//! ```
//!
//! Handlers never see a status; they return a `FailureDescriptor` and the
//! gateway translates it exactly once.

pub mod handlers;
mod serve;

pub use serve::serve_connection;

use std::collections::HashMap;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::call::{CallIo, CallScope, Handler};
use crate::collab::{CallEvent, CallEventKind, Collaborators};
use crate::error::FailureDescriptor;
use crate::operation::Operation;
use crate::status::Status;
use crate::teardown::with_autocleanup;
use crate::translate::translate;

pub type HandlerConstructor =
    fn(Operation, &Collaborators) -> Result<Handler, FailureDescriptor>;

// ── HandlerTable ─────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct HandlerTable {
    entries: HashMap<Operation, HandlerConstructor>,
}

impl HandlerTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every operation forwarded to the executor, except the main-screen
    /// surface which the core serves through its handoff bridge.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        for operation in Operation::ALL {
            table.register(operation, handlers::forwarding);
        }
        table.register(Operation::GetMainScreenSurface, handlers::main_screen_surface);
        table
    }

    /// Install `constructor` for `operation`, returning the one it replaced.
    pub fn register(
        &mut self,
        operation: Operation,
        constructor: HandlerConstructor,
    ) -> Option<HandlerConstructor> {
        self.entries.insert(operation, constructor)
    }

    pub fn get(&self, operation: Operation) -> Option<HandlerConstructor> {
        self.entries.get(&operation).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("operations", &self.entries.len())
            .finish()
    }
}

// ── Gateway ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Gateway {
    collaborators: Collaborators,
    table: HandlerTable,
}

impl Gateway {
    pub fn new(collaborators: Collaborators, table: HandlerTable) -> Self {
        Self {
            collaborators,
            table,
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    /// Serve one call to completion and return its terminal status.
    ///
    /// `cancel` is the transport's cancellation signal for this call. Its
    /// firing drains the call's cleanup and yields a `CANCELLED` status.
    pub async fn dispatch(
        &self,
        operation: Operation,
        call_id: u64,
        io: CallIo,
        cancel: &CancellationToken,
    ) -> Status {
        let started = Instant::now();
        self.report(call_id, operation, CallEventKind::Started);

        let outcome = with_autocleanup(cancel, |teardown| async move {
            let handler = self.construct(operation)?;
            let scope = CallScope::new(call_id, operation, cancel.clone(), teardown);
            handler.execute(io, &scope).await
        })
        .await;

        let status = match outcome {
            Ok(()) => Status::ok(),
            Err(failure) => {
                let status = translate(&failure);
                if failure.is_cancelled() {
                    debug!(call_id, %operation, "call cancelled");
                } else {
                    warn!(call_id, %operation, cause = %failure, %status, "call failed");
                    self.collaborators.logger.error(&format!(
                        "{operation} (call {call_id}) failed: {failure}"
                    ));
                }
                status
            }
        };

        self.report(
            call_id,
            operation,
            CallEventKind::Finished {
                code: status.code,
                duration: started.elapsed(),
            },
        );
        status
    }

    fn construct(&self, operation: Operation) -> Result<Handler, FailureDescriptor> {
        let constructor = self.table.get(operation).ok_or_else(|| {
            FailureDescriptor::unsupported(format!("no handler registered for {operation}"))
        })?;

        if operation.requires_target_logger() && self.collaborators.target.logger().is_none() {
            return Err(FailureDescriptor::internal("Target logger not configured"));
        }

        let handler = constructor(operation, &self.collaborators)?;
        if handler.shape() != operation.shape() {
            return Err(FailureDescriptor::internal(format!(
                "handler for {operation} is {}, expected {}",
                handler.shape(),
                operation.shape()
            )));
        }
        Ok(handler)
    }

    fn report(&self, call_id: u64, operation: Operation, kind: CallEventKind) {
        self.collaborators.reporter.report(&CallEvent {
            call_id,
            operation,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{Inbound, UnaryHandler, call_io};
    use crate::collab::{CommandExecutor, EventReporter, Logger, Target, TracingLogger};
    use crate::handoff::{
        ChannelConnection, ChannelConnector, ChannelError, ChannelLink, ChannelMessage,
        GlobalIdWrapper, HandoffBridge, Reply, SurfaceHandle,
    };
    use crate::protocol::MainScreenSurfaceRequest;
    use crate::status::StatusCode;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, oneshot};

    struct Device {
        logger: Option<Arc<dyn Logger>>,
    }

    impl Target for Device {
        fn udid(&self) -> &str {
            "TEST-UDID"
        }

        fn logger(&self) -> Option<Arc<dyn Logger>> {
            self.logger.clone()
        }
    }

    #[derive(Default)]
    struct Executor {
        surface_fetches: AtomicUsize,
        surface_failure: Option<&'static str>,
    }

    #[async_trait]
    impl CommandExecutor for Executor {
        async fn main_screen_surface(&self) -> Result<SurfaceHandle, FailureDescriptor> {
            self.surface_fetches.fetch_add(1, Ordering::SeqCst);
            match self.surface_failure {
                Some(cause) => Err(FailureDescriptor::new(cause)),
                None => Ok(SurfaceHandle::new(1)),
            }
        }

        async fn unary(
            &self,
            operation: Operation,
            request: Bytes,
            _scope: &CallScope,
        ) -> Result<Bytes, FailureDescriptor> {
            match operation {
                Operation::Describe => Ok(request),
                Operation::Focus => Err(FailureDescriptor::new("Simulator must be booted first")),
                _ => Err(FailureDescriptor::unsupported(operation.name())),
            }
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<CallEvent>>);

    impl EventReporter for Arc<Events> {
        fn report(&self, event: &CallEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct Unreachable;

    #[async_trait]
    impl ChannelConnector for Unreachable {
        async fn connect(&self, endpoint: &str) -> Result<ChannelLink, ChannelError> {
            Err(ChannelError::Invalid(endpoint.to_string()))
        }
    }

    /// Accepts every connection and never answers.
    #[derive(Default)]
    struct Silent {
        connects: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    struct SilentConnection {
        closes: Arc<AtomicUsize>,
        parked: Mutex<Vec<oneshot::Sender<Reply>>>,
    }

    #[async_trait]
    impl ChannelConnector for Silent {
        async fn connect(&self, _endpoint: &str) -> Result<ChannelLink, ChannelError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (_errors_tx, errors) = mpsc::channel(1);
            Ok(ChannelLink {
                connection: Arc::new(SilentConnection {
                    closes: Arc::clone(&self.closes),
                    parked: Mutex::new(Vec::new()),
                }),
                errors,
            })
        }
    }

    #[async_trait]
    impl ChannelConnection for SilentConnection {
        fn send_with_reply(&self, _message: ChannelMessage) -> oneshot::Receiver<Reply> {
            let (tx, rx) = oneshot::channel();
            self.parked.lock().unwrap().push(tx);
            rx
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn gateway(
        logger: Option<Arc<dyn Logger>>,
        executor: Arc<Executor>,
        table: HandlerTable,
    ) -> (Gateway, Arc<Events>) {
        gateway_with(Arc::new(Unreachable), logger, executor, table)
    }

    fn gateway_with(
        connector: Arc<dyn ChannelConnector>,
        logger: Option<Arc<dyn Logger>>,
        executor: Arc<Executor>,
        table: HandlerTable,
    ) -> (Gateway, Arc<Events>) {
        let events = Arc::new(Events::default());
        let collaborators = Collaborators {
            target: Arc::new(Device { logger }),
            executor,
            reporter: Arc::new(Arc::clone(&events)),
            logger: Arc::new(TracingLogger::new("companion")),
            handoff: HandoffBridge::new(connector, Arc::new(GlobalIdWrapper)),
        };
        (Gateway::new(collaborators, table), events)
    }

    fn pipes(requests: &[&[u8]]) -> (CallIo, mpsc::Receiver<Bytes>) {
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        for r in requests {
            in_tx.try_send(Ok(Bytes::copy_from_slice(r))).unwrap();
        }
        (call_io(in_rx, out_tx), out_rx)
    }

    #[tokio::test]
    async fn forwards_and_reports() {
        let (gw, events) = gateway(None, Arc::default(), HandlerTable::standard());
        let (io, mut out) = pipes(&[b"info"]);

        let status = gw
            .dispatch(Operation::Describe, 5, io, &CancellationToken::new())
            .await;
        assert!(status.is_ok());
        assert_eq!(out.recv().await.unwrap(), Bytes::from_static(b"info"));

        let events = events.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, CallEventKind::Started);
        assert!(matches!(
            events[1].kind,
            CallEventKind::Finished { code: StatusCode::Ok, .. }
        ));
    }

    #[tokio::test]
    async fn untagged_failure_is_translated_by_text() {
        let (gw, _) = gateway(None, Arc::default(), HandlerTable::standard());
        let (io, _out) = pipes(&[b""]);
        let status = gw.dispatch(Operation::Focus, 1, io, &CancellationToken::new()).await;
        assert_eq!(status.code, StatusCode::FailedPrecondition);
        assert_eq!(status.message, "Simulator must be booted first");
    }

    #[tokio::test]
    async fn missing_target_logger_fails_before_handler() {
        let (gw, _) = gateway(None, Arc::default(), HandlerTable::standard());
        let (io, _out) = pipes(&[]);
        let status = gw.dispatch(Operation::VideoStream, 1, io, &CancellationToken::new()).await;
        assert_eq!(status.code, StatusCode::Internal);
        assert_eq!(status.message, "Target logger not configured");

        let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new("device"));
        let (gw, _) = gateway(Some(logger), Arc::default(), HandlerTable::standard());
        let (io, _out) = pipes(&[]);
        let status = gw.dispatch(Operation::VideoStream, 2, io, &CancellationToken::new()).await;
        // Reaches the executor, which does not stream video.
        assert_eq!(status.code, StatusCode::Unimplemented);
    }

    #[tokio::test]
    async fn unregistered_operation_is_unimplemented() {
        let (gw, _) = gateway(None, Arc::default(), HandlerTable::empty());
        let (io, _out) = pipes(&[b""]);
        let status = gw.dispatch(Operation::Ls, 1, io, &CancellationToken::new()).await;
        assert_eq!(status.code, StatusCode::Unimplemented);
    }

    struct Wrong;

    #[async_trait]
    impl UnaryHandler for Wrong {
        async fn handle(&self, r: Bytes, _: &CallScope) -> Result<Bytes, FailureDescriptor> {
            Ok(r)
        }
    }

    #[tokio::test]
    async fn shape_mismatch_is_internal() {
        let mut table = HandlerTable::empty();
        table.register(Operation::Hid, |_, _| Ok(Handler::Unary(Box::new(Wrong))));
        let (gw, _) = gateway(None, Arc::default(), table);
        let (io, _out) = pipes(&[b""]);
        let status = gw.dispatch(Operation::Hid, 1, io, &CancellationToken::new()).await;
        assert_eq!(status.code, StatusCode::Internal);
    }

    #[tokio::test]
    async fn cancelled_call_reports_cancelled() {
        let (gw, events) = gateway(None, Arc::default(), HandlerTable::standard());
        // Request never half-closes, so the unary handler waits forever.
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let status = gw
            .dispatch(Operation::Describe, 1, call_io(in_rx, out_tx), &cancel)
            .await;
        drop(in_tx);
        assert_eq!(status.code, StatusCode::Cancelled);
        assert_eq!(events.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn surface_request_validates_endpoint_before_fetching() {
        let executor = Arc::new(Executor::default());
        let (gw, _) = gateway(None, Arc::clone(&executor), HandlerTable::standard());
        let request = MainScreenSurfaceRequest::new("").to_bytes().unwrap();
        let (io, _out) = pipes(&[&request]);

        let status = gw
            .dispatch(Operation::GetMainScreenSurface, 1, io, &CancellationToken::new())
            .await;
        assert_eq!(status.code, StatusCode::InvalidArgument);
        assert_eq!(executor.surface_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn surface_failures_use_the_legacy_table() {
        let executor = Arc::new(Executor {
            surface_failure: Some("Timeout waiting for IOSurface after 5s"),
            ..Executor::default()
        });
        let (gw, _) = gateway(None, executor, HandlerTable::standard());
        let request = MainScreenSurfaceRequest::new("viewer").to_bytes().unwrap();
        let (io, _out) = pipes(&[&request]);

        let status = gw
            .dispatch(Operation::GetMainScreenSurface, 1, io, &CancellationToken::new())
            .await;
        assert_eq!(status.code, StatusCode::DeadlineExceeded);
        assert_eq!(status.message, "Timeout waiting for IOSurface to become available");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_internal() {
        let (gw, _) = gateway(None, Arc::default(), HandlerTable::standard());
        let request = MainScreenSurfaceRequest::new("viewer").to_bytes().unwrap();
        let (io, _out) = pipes(&[&request]);

        let status = gw
            .dispatch(Operation::GetMainScreenSurface, 1, io, &CancellationToken::new())
            .await;
        assert_eq!(status.code, StatusCode::Internal);
        assert!(status.message.contains("connection error"));
    }

    #[tokio::test]
    async fn cancelled_handoff_is_closed_before_status() {
        let connector = Arc::new(Silent::default());
        let (gw, _) = gateway_with(
            connector.clone(),
            None,
            Arc::default(),
            HandlerTable::standard(),
        );
        let request = MainScreenSurfaceRequest::new("viewer").to_bytes().unwrap();
        let (io, _out) = pipes(&[&request]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let status = gw
            .dispatch(Operation::GetMainScreenSurface, 1, io, &cancel)
            .await;
        assert_eq!(status.code, StatusCode::Cancelled);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }
}

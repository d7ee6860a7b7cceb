//! Stock handlers: forwarding to the command executor, and the surface
//! handoff the core serves itself.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::call::{
    BidiStreamingHandler, CallScope, CallShape, ClientStreamingHandler, Handler, RequestStream,
    ResponseSink, ServerStreamingHandler, UnaryHandler,
};
use crate::collab::{Collaborators, CommandExecutor, Logger};
use crate::error::FailureDescriptor;
use crate::handoff::HandoffBridge;
use crate::operation::Operation;
use crate::protocol::{MainScreenSurfaceRequest, MainScreenSurfaceResponse};

// ── Forwarding ───────────────────────────────────────────────────

/// Hands the call to the executor method matching the operation's shape.
pub struct Forward {
    operation: Operation,
    executor: Arc<dyn CommandExecutor>,
    target_logger: Option<Arc<dyn Logger>>,
}

impl Forward {
    fn log(&self, scope: &CallScope, event: &str) {
        if let Some(logger) = &self.target_logger {
            logger.info(&format!("{} (call {}) {event}", self.operation, scope.call_id()));
        }
    }

    fn finish<T>(&self, scope: &CallScope, result: &Result<T, FailureDescriptor>) {
        if let (Some(logger), Err(failure)) = (&self.target_logger, result) {
            logger.error(&format!(
                "{} (call {}) failed: {failure}",
                self.operation,
                scope.call_id()
            ));
        } else {
            self.log(scope, "finished");
        }
    }
}

#[async_trait]
impl UnaryHandler for Forward {
    async fn handle(&self, request: Bytes, scope: &CallScope) -> Result<Bytes, FailureDescriptor> {
        self.log(scope, "started");
        let result = self.executor.unary(self.operation, request, scope).await;
        self.finish(scope, &result);
        result
    }
}

#[async_trait]
impl ClientStreamingHandler for Forward {
    async fn handle(
        &self,
        requests: &mut RequestStream,
        scope: &CallScope,
    ) -> Result<Bytes, FailureDescriptor> {
        self.log(scope, "started");
        let result = self.executor.client_stream(self.operation, requests, scope).await;
        self.finish(scope, &result);
        result
    }
}

#[async_trait]
impl ServerStreamingHandler for Forward {
    async fn handle(
        &self,
        request: Bytes,
        responses: &ResponseSink,
        scope: &CallScope,
    ) -> Result<(), FailureDescriptor> {
        self.log(scope, "started");
        let result = self
            .executor
            .server_stream(self.operation, request, responses, scope)
            .await;
        self.finish(scope, &result);
        result
    }
}

#[async_trait]
impl BidiStreamingHandler for Forward {
    async fn handle(
        &self,
        requests: &mut RequestStream,
        responses: &ResponseSink,
        scope: &CallScope,
    ) -> Result<(), FailureDescriptor> {
        self.log(scope, "started");
        let result = self
            .executor
            .bidi_stream(self.operation, requests, responses, scope)
            .await;
        self.finish(scope, &result);
        result
    }
}

/// Constructor for every operation the executor serves.
pub fn forwarding(
    operation: Operation,
    collaborators: &Collaborators,
) -> Result<Handler, FailureDescriptor> {
    let forward = Forward {
        operation,
        executor: Arc::clone(&collaborators.executor),
        target_logger: collaborators.target.logger(),
    };
    Ok(match operation.shape() {
        CallShape::Unary => Handler::Unary(Box::new(forward)),
        CallShape::ClientStreaming => Handler::ClientStreaming(Box::new(forward)),
        CallShape::ServerStreaming => Handler::ServerStreaming(Box::new(forward)),
        CallShape::BidiStreaming => Handler::BidiStreaming(Box::new(forward)),
    })
}

// ── Main-screen surface ──────────────────────────────────────────

/// Fetches the main-screen surface and hands it to the requested endpoint.
pub struct MainScreenSurface {
    executor: Arc<dyn CommandExecutor>,
    bridge: HandoffBridge,
}

#[async_trait]
impl UnaryHandler for MainScreenSurface {
    async fn handle(&self, request: Bytes, scope: &CallScope) -> Result<Bytes, FailureDescriptor> {
        let request = MainScreenSurfaceRequest::decode(&request)?;
        if request.endpoint.is_empty() {
            return Err(FailureDescriptor::invalid_argument(
                "Invalid argument: secondary endpoint name is required",
            ));
        }

        let surface = self.executor.main_screen_surface().await?;
        let status = self
            .bridge
            .share(&surface, &request.endpoint, scope.cancellation(), scope.teardown())
            .await?;
        MainScreenSurfaceResponse::new(status).encode()
    }
}

pub fn main_screen_surface(
    _operation: Operation,
    collaborators: &Collaborators,
) -> Result<Handler, FailureDescriptor> {
    Ok(Handler::Unary(Box::new(MainScreenSurface {
        executor: Arc::clone(&collaborators.executor),
        bridge: collaborators.handoff.clone(),
    })))
}

//! Per-call plumbing: shapes, scope, and the ordered request/response pipes.
//!
//! A transport hands each call an inbound `mpsc` of request messages and an
//! outbound `mpsc` for responses. [`call_io`] wraps both ends into a
//! [`RequestStream`] / [`ResponseSink`] pair sharing one fault slot: once
//! the inbound side fails, the sink refuses further responses, so an inbound
//! failure terminates the outbound sequence even if a handler ignores it.

mod handler;

pub use handler::{
    BidiStreamingHandler, ClientStreamingHandler, Handler, ServerStreamingHandler, UnaryHandler,
};

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FailureDescriptor;
use crate::operation::Operation;
use crate::teardown::TeardownContext;

/// One inbound item: a request message or a transport-level failure.
pub type Inbound = Result<Bytes, FailureDescriptor>;

// ── CallShape ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// One request in, one response out.
    Unary,
    /// Many requests in, one response out after the input ends.
    ClientStreaming,
    /// One request in, many responses out.
    ServerStreaming,
    /// Independent sequences in both directions.
    BidiStreaming,
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallShape::Unary => "unary",
            CallShape::ClientStreaming => "client-streaming",
            CallShape::ServerStreaming => "server-streaming",
            CallShape::BidiStreaming => "bidi-streaming",
        };
        f.write_str(s)
    }
}

// ── CallScope ────────────────────────────────────────────────────

/// Identity and lifetime handles of one call, passed to every handler.
#[derive(Debug, Clone)]
pub struct CallScope {
    call_id: u64,
    operation: Operation,
    cancel: CancellationToken,
    teardown: TeardownContext,
}

impl CallScope {
    pub fn new(
        call_id: u64,
        operation: Operation,
        cancel: CancellationToken,
        teardown: TeardownContext,
    ) -> Self {
        Self {
            call_id,
            operation,
            cancel,
            teardown,
        }
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Cancellation signal of the transport session carrying this call.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Where handlers register cleanup for resources they acquire.
    pub fn teardown(&self) -> &TeardownContext {
        &self.teardown
    }
}

// ── Fault slot ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StreamFault(OnceLock<FailureDescriptor>);

impl StreamFault {
    fn trip(&self, failure: FailureDescriptor) {
        let _ = self.0.set(failure);
    }

    fn get(&self) -> Option<&FailureDescriptor> {
        self.0.get()
    }
}

/// Link a transport's inbound and outbound channels for one call.
pub fn call_io(inbound: mpsc::Receiver<Inbound>, outbound: mpsc::Sender<Bytes>) -> CallIo {
    let fault = Arc::new(StreamFault::default());
    CallIo {
        requests: RequestStream {
            rx: inbound,
            fault: Arc::clone(&fault),
            finished: false,
            received: 0,
        },
        responses: ResponseSink {
            tx: outbound,
            fault,
        },
    }
}

/// Both directions of one call.
#[derive(Debug)]
pub struct CallIo {
    pub requests: RequestStream,
    pub responses: ResponseSink,
}

// ── RequestStream ────────────────────────────────────────────────

/// Ordered inbound request messages of one call.
#[derive(Debug)]
pub struct RequestStream {
    rx: mpsc::Receiver<Inbound>,
    fault: Arc<StreamFault>,
    finished: bool,
    received: u64,
}

impl RequestStream {
    /// Next request, `Ok(None)` once the client finished sending.
    pub async fn message(&mut self) -> Result<Option<Bytes>, FailureDescriptor> {
        self.next().await.transpose()
    }

    /// Consume and discard the remainder of the sequence.
    ///
    /// Returns how many messages were skipped.
    pub async fn drain(&mut self) -> Result<usize, FailureDescriptor> {
        let mut skipped = 0;
        while self.message().await?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Messages delivered so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Stream for RequestStream {
    type Item = Inbound;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(message))) => {
                self.received += 1;
                Poll::Ready(Some(Ok(message)))
            }
            Poll::Ready(Some(Err(failure))) => {
                self.finished = true;
                self.fault.trip(failure.clone());
                Poll::Ready(Some(Err(failure)))
            }
        }
    }
}

// ── ResponseSink ─────────────────────────────────────────────────

/// Ordered outbound response messages of one call.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    tx: mpsc::Sender<Bytes>,
    fault: Arc<StreamFault>,
}

impl ResponseSink {
    /// Emit one response. Fails once the inbound side has failed or the
    /// transport stopped listening.
    pub async fn send(&self, message: impl Into<Bytes>) -> Result<(), FailureDescriptor> {
        if let Some(failure) = self.fault.get() {
            return Err(failure.clone());
        }
        self.tx
            .send(message.into())
            .await
            .map_err(|_| FailureDescriptor::cancelled())
    }

    /// The inbound failure that terminated this call, if any.
    pub fn fault(&self) -> Option<FailureDescriptor> {
        self.fault.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io(capacity: usize) -> (mpsc::Sender<Inbound>, mpsc::Receiver<Bytes>, CallIo) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (in_tx, out_rx, call_io(in_rx, out_tx))
    }

    #[tokio::test]
    async fn requests_arrive_in_order_then_end() {
        let (tx, _out, mut io) = io(8);
        for i in 0..3u8 {
            tx.send(Ok(Bytes::from(vec![i]))).await.unwrap();
        }
        drop(tx);

        for i in 0..3u8 {
            assert_eq!(io.requests.message().await.unwrap().unwrap()[..], [i]);
        }
        assert!(io.requests.message().await.unwrap().is_none());
        assert!(io.requests.is_finished());
        assert_eq!(io.requests.received(), 3);
    }

    #[tokio::test]
    async fn inbound_failure_closes_the_sink() {
        let (tx, mut out, mut io) = io(8);
        io.responses.send(Bytes::from_static(b"before")).await.unwrap();

        tx.send(Err(FailureDescriptor::internal("peer reset"))).await.unwrap();
        let err = io.requests.message().await.unwrap_err();
        assert_eq!(err.cause(), "peer reset");

        let refused = io.responses.send(Bytes::from_static(b"after")).await;
        assert_eq!(refused.unwrap_err().cause(), "peer reset");
        assert_eq!(io.responses.fault().unwrap().cause(), "peer reset");

        assert_eq!(out.recv().await.unwrap(), Bytes::from_static(b"before"));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_after_transport_drop_is_cancelled() {
        let (_tx, out, io) = io(1);
        drop(out);
        let err = io.responses.send(Bytes::new()).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}

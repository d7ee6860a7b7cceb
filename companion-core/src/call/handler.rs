//! Handler shapes and the streaming adapter that normalizes them.
//!
//! Each operation's logic implements exactly one of the four shape traits.
//! [`Handler::execute`] turns any of them into the single contract the
//! scoped wrapper runs: `(CallIo, &CallScope) -> Result<(), FailureDescriptor>`.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{CallIo, CallScope, CallShape, RequestStream, ResponseSink};
use crate::error::FailureDescriptor;

#[async_trait]
pub trait UnaryHandler: Send + Sync {
    async fn handle(&self, request: Bytes, scope: &CallScope) -> Result<Bytes, FailureDescriptor>;
}

#[async_trait]
pub trait ClientStreamingHandler: Send + Sync {
    async fn handle(
        &self,
        requests: &mut RequestStream,
        scope: &CallScope,
    ) -> Result<Bytes, FailureDescriptor>;
}

#[async_trait]
pub trait ServerStreamingHandler: Send + Sync {
    async fn handle(
        &self,
        request: Bytes,
        responses: &ResponseSink,
        scope: &CallScope,
    ) -> Result<(), FailureDescriptor>;
}

#[async_trait]
pub trait BidiStreamingHandler: Send + Sync {
    async fn handle(
        &self,
        requests: &mut RequestStream,
        responses: &ResponseSink,
        scope: &CallScope,
    ) -> Result<(), FailureDescriptor>;
}

/// A constructed handler of one of the four shapes.
pub enum Handler {
    Unary(Box<dyn UnaryHandler>),
    ClientStreaming(Box<dyn ClientStreamingHandler>),
    ServerStreaming(Box<dyn ServerStreamingHandler>),
    BidiStreaming(Box<dyn BidiStreamingHandler>),
}

impl Handler {
    pub fn shape(&self) -> CallShape {
        match self {
            Handler::Unary(_) => CallShape::Unary,
            Handler::ClientStreaming(_) => CallShape::ClientStreaming,
            Handler::ServerStreaming(_) => CallShape::ServerStreaming,
            Handler::BidiStreaming(_) => CallShape::BidiStreaming,
        }
    }

    /// Run the handler against the call's pipes.
    ///
    /// - unary / server-streaming: exactly one request must arrive before
    ///   the client half-closes.
    /// - client-streaming: the single response is emitted only after the
    ///   inbound sequence is fully consumed.
    /// - any shape: an inbound failure is the call's terminal error even if
    ///   the handler returned normally.
    pub async fn execute(&self, io: CallIo, scope: &CallScope) -> Result<(), FailureDescriptor> {
        let CallIo {
            mut requests,
            responses,
        } = io;

        let result = match self {
            Handler::Unary(h) => {
                let request = single_request(&mut requests).await?;
                let response = h.handle(request, scope).await?;
                responses.send(response).await
            }
            Handler::ClientStreaming(h) => {
                let response = h.handle(&mut requests, scope).await?;
                let skipped = requests.drain().await?;
                if skipped > 0 {
                    debug!(
                        call_id = scope.call_id(),
                        skipped, "handler answered before input ended; discarded the rest"
                    );
                }
                responses.send(response).await
            }
            Handler::ServerStreaming(h) => {
                let request = single_request(&mut requests).await?;
                h.handle(request, &responses, scope).await
            }
            Handler::BidiStreaming(h) => h.handle(&mut requests, &responses, scope).await,
        };

        match (result, responses.fault()) {
            (Ok(()), Some(inbound)) => Err(inbound),
            (result, _) => result,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}

async fn single_request(requests: &mut RequestStream) -> Result<Bytes, FailureDescriptor> {
    let request = requests
        .message()
        .await?
        .ok_or_else(|| FailureDescriptor::invalid_argument("expected one request message, got none"))?;
    if requests.message().await?.is_some() {
        return Err(FailureDescriptor::invalid_argument(
            "expected one request message, got several",
        ));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{Inbound, call_io};
    use crate::operation::Operation;
    use crate::teardown::TeardownContext;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn scope(op: Operation) -> CallScope {
        CallScope::new(1, op, CancellationToken::new(), TeardownContext::new())
    }

    struct Echo;

    #[async_trait]
    impl UnaryHandler for Echo {
        async fn handle(&self, request: Bytes, _: &CallScope) -> Result<Bytes, FailureDescriptor> {
            Ok(request)
        }
    }

    /// Counts requests; records how many it had seen when it answered.
    struct Count {
        seen_at_answer: Arc<Mutex<Option<u64>>>,
    }

    #[async_trait]
    impl ClientStreamingHandler for Count {
        async fn handle(
            &self,
            requests: &mut RequestStream,
            _: &CallScope,
        ) -> Result<Bytes, FailureDescriptor> {
            let mut n = 0u8;
            while requests.message().await?.is_some() {
                n += 1;
            }
            *self.seen_at_answer.lock().unwrap() = Some(requests.received());
            Ok(Bytes::from(vec![n]))
        }
    }

    /// Answers after the first message without reading the rest.
    struct Impatient;

    #[async_trait]
    impl ClientStreamingHandler for Impatient {
        async fn handle(
            &self,
            requests: &mut RequestStream,
            _: &CallScope,
        ) -> Result<Bytes, FailureDescriptor> {
            requests.message().await?;
            Ok(Bytes::from_static(b"early"))
        }
    }

    struct Repeat;

    #[async_trait]
    impl ServerStreamingHandler for Repeat {
        async fn handle(
            &self,
            request: Bytes,
            responses: &ResponseSink,
            _: &CallScope,
        ) -> Result<(), FailureDescriptor> {
            for _ in 0..3 {
                responses.send(request.clone()).await?;
            }
            Ok(())
        }
    }

    /// Echoes every inbound message, ignoring inbound failures.
    struct Mirror;

    #[async_trait]
    impl BidiStreamingHandler for Mirror {
        async fn handle(
            &self,
            requests: &mut RequestStream,
            responses: &ResponseSink,
            _: &CallScope,
        ) -> Result<(), FailureDescriptor> {
            while let Ok(Some(msg)) = requests.message().await {
                responses.send(msg).await?;
            }
            let _ = responses.send(Bytes::from_static(b"late")).await;
            Ok(())
        }
    }

    fn pipes() -> (mpsc::Sender<Inbound>, mpsc::Receiver<Bytes>, CallIo) {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        (in_tx, out_rx, call_io(in_rx, out_tx))
    }

    #[tokio::test]
    async fn unary_round_trip() {
        let (tx, mut out, io) = pipes();
        tx.send(Ok(Bytes::from_static(b"ping"))).await.unwrap();
        drop(tx);

        Handler::Unary(Box::new(Echo))
            .execute(io, &scope(Operation::Connect))
            .await
            .unwrap();
        assert_eq!(out.recv().await.unwrap(), Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn unary_rejects_missing_and_extra_requests() {
        let (tx, _out, io) = pipes();
        drop(tx);
        let err = Handler::Unary(Box::new(Echo))
            .execute(io, &scope(Operation::Connect))
            .await
            .unwrap_err();
        assert!(err.cause().contains("got none"));

        let (tx, _out, io) = pipes();
        tx.send(Ok(Bytes::from_static(b"a"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"b"))).await.unwrap();
        drop(tx);
        let err = Handler::Unary(Box::new(Echo))
            .execute(io, &scope(Operation::Connect))
            .await
            .unwrap_err();
        assert!(err.cause().contains("several"));
    }

    #[tokio::test]
    async fn client_stream_answers_after_input_ends() {
        let (tx, mut out, io) = pipes();
        let seen = Arc::new(Mutex::new(None));
        let handler = Handler::ClientStreaming(Box::new(Count {
            seen_at_answer: Arc::clone(&seen),
        }));

        let run = tokio::spawn(async move { handler.execute(io, &scope(Operation::Push)).await });
        for _ in 0..4 {
            tx.send(Ok(Bytes::from_static(b"chunk"))).await.unwrap();
        }
        // Nothing may be emitted while the client is still sending.
        tokio::task::yield_now().await;
        assert!(out.try_recv().is_err());
        drop(tx);

        run.await.unwrap().unwrap();
        assert_eq!(out.recv().await.unwrap()[..], [4]);
        assert_eq!(*seen.lock().unwrap(), Some(4));
    }

    #[tokio::test]
    async fn client_stream_early_answer_waits_for_end() {
        let (tx, mut out, io) = pipes();
        let run = tokio::spawn(async move {
            Handler::ClientStreaming(Box::new(Impatient))
                .execute(io, &scope(Operation::AddMedia))
                .await
        });
        tx.send(Ok(Bytes::from_static(b"1"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"2"))).await.unwrap();
        tokio::task::yield_now().await;
        assert!(out.try_recv().is_err());

        drop(tx);
        run.await.unwrap().unwrap();
        assert_eq!(out.recv().await.unwrap(), Bytes::from_static(b"early"));
    }

    #[tokio::test]
    async fn server_stream_emits_in_order() {
        let (tx, mut out, io) = pipes();
        tx.send(Ok(Bytes::from_static(b"x"))).await.unwrap();
        drop(tx);

        Handler::ServerStreaming(Box::new(Repeat))
            .execute(io, &scope(Operation::Log))
            .await
            .unwrap();
        for _ in 0..3 {
            assert_eq!(out.recv().await.unwrap(), Bytes::from_static(b"x"));
        }
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn bidi_inbound_failure_terminates_outbound() {
        let (tx, mut out, io) = pipes();
        tx.send(Ok(Bytes::from_static(b"one"))).await.unwrap();
        tx.send(Err(FailureDescriptor::data_loss("corrupt frame"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"never"))).await.unwrap();

        let err = Handler::BidiStreaming(Box::new(Mirror))
            .execute(io, &scope(Operation::Tail))
            .await
            .unwrap_err();
        assert_eq!(err.cause(), "corrupt frame");

        assert_eq!(out.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert!(out.recv().await.is_none());
    }
}

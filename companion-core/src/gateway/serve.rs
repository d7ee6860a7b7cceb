//! Serve calls over one framed connection.
//!
//! ```text
//!  Open(id, op) ─► spawn call task ─► Gateway::dispatch ─┬─► Response* ─► Status
//!  Request(id)  ─► inbound queue of call id              │
//!  HalfClose(id)─► close inbound queue                   │
//!  Cancel(id)   ─► cancel call id ───────────────────────┘
//! ```
//!
//! Every opened call gets exactly one `Status` frame, including calls whose
//! handler panicked. When the connection fails or the peer goes away, every
//! in-flight call observes an inbound failure and is cancelled.
//!
//! The demux loop never waits on a single call: a call whose inbound queue
//! is full is cancelled instead of stalling the other calls.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Gateway;
use crate::call::{Inbound, call_io};
use crate::error::{CompanionError, FailureDescriptor};
use crate::frame::Frame;
use crate::header::FrameKind;
use crate::network::{FrameConnection, FrameSender};
use crate::operation::Operation;
use crate::status::{Status, StatusCode};
use crate::task::{CallPool, panic_message};

const CALL_QUEUE_CAPACITY: usize = 64;

struct OpenCall {
    /// `None` once the client half-closed.
    inbound: Option<mpsc::Sender<Inbound>>,
    cancel: CancellationToken,
}

/// Serve every call the peer opens on `stream` until the peer disconnects
/// or `shutdown` fires. Returns once all call tasks have finished.
pub async fn serve_connection<T>(
    gateway: Arc<Gateway>,
    stream: T,
    shutdown: CancellationToken,
) -> Result<(), CompanionError>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (frames, mut inbound_frames) = FrameConnection::new(stream).into_split();
    let session = shutdown.child_token();
    let mut calls: HashMap<u64, OpenCall> = HashMap::new();
    let mut pool = CallPool::new();

    let result = loop {
        tokio::select! {
            _ = session.cancelled() => break Ok(()),
            Some(event) = pool.recv() => {
                let call_id = pool.process_event(&event);
                calls.remove(&call_id);
            }
            next = inbound_frames.recv() => match next {
                Some(Ok(frame)) => {
                    handle_frame(&gateway, &frames, &session, &mut calls, &mut pool, frame).await;
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
        }
    };

    // Fail every in-flight call's inbound side, then cancel them all.
    let failure = match &result {
        Ok(()) => FailureDescriptor::cancelled(),
        Err(e) => FailureDescriptor::internal(format!("call connection failed: {e}")),
    };
    for (_, call) in calls.drain() {
        if let Some(inbound) = call.inbound {
            let _ = inbound.try_send(Err(failure.clone()));
        }
        call.cancel.cancel();
    }
    session.cancel();
    pool.join_all().await;

    if let Err(e) = &result {
        warn!(error = %e, "call connection failed");
    }
    result
}

async fn handle_frame(
    gateway: &Arc<Gateway>,
    frames: &FrameSender,
    session: &CancellationToken,
    calls: &mut HashMap<u64, OpenCall>,
    pool: &mut CallPool,
    frame: Frame,
) {
    let call_id = frame.call_id();
    match frame.kind() {
        FrameKind::Open => {
            if calls.contains_key(&call_id) || pool.contains(call_id) {
                warn!(call_id, "duplicate call id ignored");
                return;
            }
            let operation = match frame.operation() {
                Ok(op) => op,
                Err(e) => {
                    debug!(call_id, error = %e, "open for unknown operation");
                    let status = Status::new(StatusCode::Unimplemented, e.to_string());
                    send_status(frames, call_id, &status).await;
                    return;
                }
            };
            let (inbound_tx, inbound_rx) = mpsc::channel(CALL_QUEUE_CAPACITY);
            let cancel = session.child_token();
            calls.insert(
                call_id,
                OpenCall {
                    inbound: Some(inbound_tx),
                    cancel: cancel.clone(),
                },
            );
            pool.spawn(
                call_id,
                run_call(
                    Arc::clone(gateway),
                    frames.clone(),
                    operation,
                    call_id,
                    inbound_rx,
                    cancel,
                ),
            );
        }
        FrameKind::Request => {
            let Some(call) = calls.get_mut(&call_id) else {
                debug!(call_id, "request for unknown call dropped");
                return;
            };
            let Some(inbound) = call.inbound.as_ref() else {
                debug!(call_id, "request after half-close dropped");
                return;
            };
            match inbound.try_send(Ok(frame.into_payload())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(call_id, "inbound queue full; cancelling call");
                    call.inbound = None;
                    call.cancel.cancel();
                }
                // The handler stopped reading and no longer needs input.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        FrameKind::HalfClose => {
            if let Some(call) = calls.get_mut(&call_id) {
                call.inbound = None;
            }
        }
        FrameKind::Cancel => {
            if let Some(call) = calls.get(&call_id) {
                debug!(call_id, "call cancelled by client");
                call.cancel.cancel();
            }
        }
        FrameKind::Heartbeat => {}
        FrameKind::Response | FrameKind::Status => {
            warn!(call_id, kind = ?frame.kind(), "server-bound frame of client kind ignored");
        }
    }
}

async fn run_call(
    gateway: Arc<Gateway>,
    frames: FrameSender,
    operation: Operation,
    call_id: u64,
    inbound: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(CALL_QUEUE_CAPACITY);
    let io = call_io(inbound, outbound_tx);

    let mut oversized = None;
    let pump = async {
        while let Some(message) = outbound_rx.recv().await {
            match Frame::response(call_id, message) {
                Ok(frame) => {
                    if frames.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    oversized = Some(e);
                    cancel.cancel();
                    break;
                }
            }
        }
    };

    let dispatch = AssertUnwindSafe(gateway.dispatch(operation, call_id, io, &cancel)).catch_unwind();
    let (outcome, ()) = tokio::join!(dispatch, pump);
    let mut status = match outcome {
        Ok(status) => status,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(call_id, %operation, panic = %message, "call handler panicked");
            Status::new(StatusCode::Internal, format!("handler panicked: {message}"))
        }
    };
    if let Some(e) = oversized {
        status = Status::new(StatusCode::Internal, format!("response not sent: {e}"));
    }
    info!(call_id, %operation, %status, "call complete");
    send_status(&frames, call_id, &status).await;
}

async fn send_status(frames: &FrameSender, call_id: u64, status: &Status) {
    let frame = match Frame::status(call_id, status) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(call_id, error = %e, "status frame could not be built");
            let fallback = Status::new(StatusCode::Internal, "status message too large");
            match Frame::status(call_id, &fallback) {
                Ok(frame) => frame,
                Err(_) => return,
            }
        }
    };
    if frames.send(frame).await.is_err() {
        debug!(call_id, "peer gone before status could be sent");
    }
}

//! Client side of the call protocol.
//!
//! One demux task reads the connection and routes `Response` and `Status`
//! frames to the [`ClientCall`] that owns their call id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::connection::{ConnectionInfo, FrameConnection, FrameReceiver, FrameSender};
use crate::error::CompanionError;
use crate::frame::Frame;
use crate::header::FrameKind;
use crate::operation::Operation;
use crate::status::Status;

type Routes = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<CallReply>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReply {
    Response(Bytes),
    Status(Status),
}

#[derive(Debug)]
pub struct CallClient {
    sender: FrameSender,
    routes: Routes,
    next_id: AtomicU64,
}

impl CallClient {
    pub async fn connect(info: &ConnectionInfo) -> Result<Self, CompanionError> {
        Ok(Self::new(FrameConnection::connect(info).await?))
    }

    pub fn new(connection: FrameConnection) -> Self {
        let (sender, receiver) = connection.into_split();
        let routes: Routes = Arc::default();
        tokio::spawn(demux(receiver, Arc::clone(&routes)));
        Self {
            sender,
            routes,
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a call. Requests are sent through the returned handle.
    pub async fn open(&self, operation: Operation) -> Result<ClientCall, CompanionError> {
        let call_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, replies) = mpsc::unbounded_channel();
        lock(&self.routes).insert(call_id, tx);
        if let Err(e) = self.sender.send(Frame::open(call_id, operation)).await {
            lock(&self.routes).remove(&call_id);
            return Err(e);
        }
        Ok(ClientCall {
            call_id,
            sender: self.sender.clone(),
            replies,
        })
    }

    /// One request, then half-close; collects every reply.
    pub async fn unary(
        &self,
        operation: Operation,
        request: impl Into<Bytes>,
    ) -> Result<(Vec<Bytes>, Status), CompanionError> {
        let mut call = self.open(operation).await?;
        call.send(request).await?;
        call.half_close().await?;
        call.finish().await
    }
}

/// Handle on one open call.
#[derive(Debug)]
pub struct ClientCall {
    call_id: u64,
    sender: FrameSender,
    replies: mpsc::UnboundedReceiver<CallReply>,
}

impl ClientCall {
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    pub async fn send(&self, request: impl Into<Bytes>) -> Result<(), CompanionError> {
        self.sender.send(Frame::request(self.call_id, request)?).await
    }

    pub async fn half_close(&self) -> Result<(), CompanionError> {
        self.sender.send(Frame::half_close(self.call_id)).await
    }

    pub async fn cancel(&self) -> Result<(), CompanionError> {
        self.sender.send(Frame::cancel(self.call_id)).await
    }

    /// Next reply; `None` after the status or if the connection dropped.
    pub async fn next(&mut self) -> Option<CallReply> {
        self.replies.recv().await
    }

    /// Collect responses up to and including the terminal status.
    pub async fn finish(mut self) -> Result<(Vec<Bytes>, Status), CompanionError> {
        let mut responses = Vec::new();
        while let Some(reply) = self.next().await {
            match reply {
                CallReply::Response(bytes) => responses.push(bytes),
                CallReply::Status(status) => return Ok((responses, status)),
            }
        }
        Err(CompanionError::ChannelClosed)
    }
}

async fn demux(mut receiver: FrameReceiver, routes: Routes) {
    while let Some(next) = receiver.recv().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "call client connection failed");
                break;
            }
        };
        let call_id = frame.call_id();
        match frame.kind() {
            FrameKind::Response => route(&routes, call_id, CallReply::Response(frame.into_payload())),
            FrameKind::Status => match frame.to_status() {
                Ok(status) => {
                    route(&routes, call_id, CallReply::Status(status));
                    lock(&routes).remove(&call_id);
                }
                Err(e) => warn!(call_id, error = %e, "undecodable status frame"),
            },
            FrameKind::Heartbeat => {}
            other => debug!(call_id, kind = ?other, "unexpected frame from server"),
        }
    }
    // Dropping the senders ends every open call.
    lock(&routes).clear();
}

fn route(routes: &Routes, call_id: u64, reply: CallReply) {
    if let Some(tx) = lock(routes).get(&call_id) {
        let _ = tx.send(reply);
    } else {
        debug!(call_id, "reply for unknown call dropped");
    }
}

fn lock(routes: &Routes) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<CallReply>>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

//! # companion-core
//!
//! RPC front-end core of the device companion.
//!
//! This crate contains:
//! - **Call lifecycle**: `with_autocleanup` scopes with LIFO teardown and cancellation
//! - **Streaming adapter**: four handler shapes normalized into one execution contract
//! - **Handoff bridge**: frame-buffer sharing over a secondary channel, settled exactly once
//! - **Error translation**: `FailureDescriptor` → `Status`, structured kinds first
//! - **Gateway**: table-driven dispatch with per-call event reporting
//! - **Transport**: `FrameHeader` / `Frame`, `CallCodec`, `FrameConnection`, `CallClient`
//! - **Error**: `CompanionError`, typed with `thiserror`

pub mod call;
pub mod codec;
pub mod collab;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod handoff;
pub mod header;
pub mod latch;
pub mod network;
pub mod operation;
pub mod protocol;
pub mod status;
pub mod task;
pub mod teardown;
pub mod translate;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use call::{
    BidiStreamingHandler, CallIo, CallScope, CallShape, ClientStreamingHandler, Handler, Inbound,
    RequestStream, ResponseSink, ServerStreamingHandler, UnaryHandler, call_io,
};
pub use codec::{CallCodec, ChannelCodec};
pub use collab::{
    CallEvent, CallEventKind, Collaborators, CommandExecutor, EventReporter, Logger, Target,
    TracingLogger, TracingReporter,
};
pub use error::{CompanionError, FailureDescriptor, FailureKind};
pub use frame::{Frame, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use gateway::{Gateway, HandlerConstructor, HandlerTable, serve_connection};
pub use handoff::{
    ChannelConnection, ChannelConnector, ChannelError, ChannelMessage, GlobalIdWrapper,
    HandoffBridge, HandoffPhase, HandoffSession, SurfaceHandle, SurfaceToken, SurfaceWrapper,
};
#[cfg(unix)]
pub use handoff::UnixConnector;
pub use header::{FrameHeader, FrameKind, HEADER_LENGTH};
pub use network::{CallClient, CallReply, ClientCall, ConnectionInfo, FrameConnection};
pub use operation::Operation;
pub use status::{Status, StatusCode};
pub use task::{CallPool, TaskEvent};
pub use teardown::{TeardownContext, with_autocleanup};
pub use translate::translate;

//! Framed call connections and the client that multiplexes calls over one.

mod client;
mod connection;

pub use client::{CallClient, CallReply, ClientCall};
pub use connection::{
    ConnectionInfo, FrameConnection, FrameReceiver, FrameSender, HEARTBEAT_INTERVAL,
};

//! Secondary-channel abstractions: surface handles, message maps and the
//! connector/connection capability the bridge talks through.
//!
//! ## Wire contract
//!
//! ```text
//! companion ──{ cmd: "sendSurface", surf: <token> }──► endpoint
//! companion ◄──{ status: "<text>" }────────────────── endpoint   (status optional)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::error::FailureDescriptor;

pub const CMD_KEY: &str = "cmd";
pub const SURFACE_KEY: &str = "surf";
pub const STATUS_KEY: &str = "status";
pub const SEND_SURFACE: &str = "sendSurface";
/// Status reported when a reply carries no `status` entry.
pub const NO_STATUS: &str = "no status";

// ── Surfaces ─────────────────────────────────────────────────────

/// Process-local frame-buffer handle, as produced by the command executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle {
    id: u32,
}

impl SurfaceHandle {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    /// Platform surface identifier.
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// A surface wrapped for transmission to another process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceToken(Vec<u8>);

impl SurfaceToken {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Capability: turn a local surface handle into a transmissible token.
pub trait SurfaceWrapper: Send + Sync {
    fn wrap(&self, surface: &SurfaceHandle) -> Result<SurfaceToken, FailureDescriptor>;
}

/// Wraps a surface by its global identifier; the receiver looks the
/// surface up by id. The null id (0) never names a live surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalIdWrapper;

impl GlobalIdWrapper {
    /// Recover the surface id from a token produced by [`wrap`](SurfaceWrapper::wrap).
    pub fn unwrap_token(token: &SurfaceToken) -> Option<u32> {
        let bytes: [u8; 4] = token.as_bytes().try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

impl SurfaceWrapper for GlobalIdWrapper {
    fn wrap(&self, surface: &SurfaceHandle) -> Result<SurfaceToken, FailureDescriptor> {
        if surface.id() == 0 {
            return Err(FailureDescriptor::internal(
                "failed to create transmissible object from surface: null surface id",
            ));
        }
        Ok(SurfaceToken(surface.id().to_le_bytes().to_vec()))
    }
}

// ── Messages ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ChannelValue {
    String(String),
    Surface(SurfaceToken),
}

/// String-keyed message map exchanged over the secondary channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMessage(BTreeMap<String, ChannelValue>);

impl ChannelMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{ cmd: "sendSurface", surf: token }`
    pub fn send_surface(token: SurfaceToken) -> Self {
        let mut message = Self::new();
        message.set_string(CMD_KEY, SEND_SURFACE);
        message.set_value(SURFACE_KEY, ChannelValue::Surface(token));
        message
    }

    /// `{ status: text }`
    pub fn status(text: impl Into<String>) -> Self {
        let mut message = Self::new();
        message.set_string(STATUS_KEY, text);
        message
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), ChannelValue::String(value.into()));
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: ChannelValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ChannelValue> {
        self.0.get(key)
    }

    /// String entry under `key`; `None` if absent or not a string.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(ChannelValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_surface(&self, key: &str) -> Option<&SurfaceToken> {
        match self.0.get(key) {
            Some(ChannelValue::Surface(t)) => Some(t),
            _ => None,
        }
    }

    /// The reply's status text, or [`NO_STATUS`].
    pub fn status_or_default(&self) -> String {
        self.get_string(STATUS_KEY).unwrap_or(NO_STATUS).to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Errors ───────────────────────────────────────────────────────

/// Transport-level error object delivered instead of a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The endpoint could not be reached or does not exist.
    #[error("connection invalid: {0}")]
    Invalid(String),

    /// The peer went away while the connection was in use.
    #[error("connection interrupted")]
    Interrupted,

    /// The connection was shut down locally before a reply arrived.
    #[error("connection terminated")]
    Terminated,

    /// Bytes arrived that do not decode as a message.
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("i/o error: {0}")]
    Io(String),
}

pub type Reply = Result<ChannelMessage, ChannelError>;

// ── Connector / connection ───────────────────────────────────────

/// An open connection plus its stream of connection-level errors.
pub struct ChannelLink {
    pub connection: Arc<dyn ChannelConnection>,
    pub errors: mpsc::Receiver<ChannelError>,
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Open a connection to the named endpoint.
    async fn connect(&self, endpoint: &str) -> Result<ChannelLink, ChannelError>;
}

#[async_trait]
pub trait ChannelConnection: Send + Sync {
    /// Queue `message`; the returned receiver yields its single reply.
    fn send_with_reply(&self, message: ChannelMessage) -> oneshot::Receiver<Reply>;

    /// Shut the connection down. Idempotent.
    async fn close(&self);
}

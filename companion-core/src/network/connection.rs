use std::fmt;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_util::codec::Framed;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use crate::codec::CallCodec;
use crate::error::CompanionError;
use crate::frame::Frame;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

const CHANNEL_CAPACITY: usize = 100;

/// A framed call connection to a single peer.
///
/// Background tasks own the socket: a writer draining the outbound queue, a
/// reader filling the inbound queue, and a heartbeat. They stop when the
/// [`FrameReceiver`] half is dropped.
#[derive(Debug)]
pub struct FrameConnection {
    sender: FrameSender,
    receiver: FrameReceiver,
}

impl FrameConnection {
    pub fn new<T>(stream: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_heartbeat(stream, Some(HEARTBEAT_INTERVAL))
    }

    pub fn with_heartbeat<T>(stream: T, heartbeat: Option<Duration>) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut net_writer, mut net_reader) = Framed::new(stream, CallCodec::new()).split();
        let shutdown = CancellationToken::new();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
        // Network -> User
        let (network_tx, user_rx) = mpsc::channel(CHANNEL_CAPACITY);

        // Writer task
        tokio::spawn(async move {
            while let Some(frame) = network_rx.recv().await {
                if let Err(e) = net_writer.send(frame).await {
                    warn!(error = %e, "call connection write failed");
                    break;
                }
            }
            let _ = net_writer.close().await;
        });

        // Reader task
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = net_reader.next() => next,
                    };
                    match next {
                        Some(Ok(frame)) => {
                            trace!(?frame, "frame received");
                            if network_tx.send(Ok(frame)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "call connection read failed");
                            let _ = network_tx.send(Err(e)).await;
                            break;
                        }
                        None => {
                            debug!("call connection closed by peer");
                            break;
                        }
                    }
                }
            });
        }

        // Heartbeat
        if let Some(period) = heartbeat {
            let heartbeat_tx = user_tx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticks = interval_at(Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticks.tick() => {}
                    }
                    if heartbeat_tx.send(Frame::heartbeat()).await.is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            sender: FrameSender { tx: user_tx },
            receiver: FrameReceiver {
                rx: user_rx,
                _shutdown: shutdown.drop_guard(),
            },
        }
    }

    pub async fn connect(info: &ConnectionInfo) -> Result<Self, CompanionError> {
        let stream = TcpStream::connect(info.to_string()).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    pub async fn send(&self, frame: Frame) -> Result<(), CompanionError> {
        self.sender.send(frame).await
    }

    /// Next inbound frame; `None` once the peer closed the connection.
    pub async fn recv(&mut self) -> Option<Result<Frame, CompanionError>> {
        self.receiver.recv().await
    }

    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    pub fn into_split(self) -> (FrameSender, FrameReceiver) {
        (self.sender, self.receiver)
    }
}

/// Cloneable outbound half.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
}

impl FrameSender {
    pub async fn send(&self, frame: Frame) -> Result<(), CompanionError> {
        Ok(self.tx.send(frame).await?)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Inbound half. Dropping it stops the connection's background tasks.
pub struct FrameReceiver {
    rx: mpsc::Receiver<Result<Frame, CompanionError>>,
    _shutdown: DropGuard,
}

impl FrameReceiver {
    pub async fn recv(&mut self) -> Option<Result<Frame, CompanionError>> {
        self.rx.recv().await
    }
}

impl fmt::Debug for FrameReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameReceiver").finish_non_exhaustive()
    }
}

// ── ConnectionInfo ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    ip: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

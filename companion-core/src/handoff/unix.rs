//! Secondary channel over Unix domain sockets.
//!
//! Endpoint names resolve to `<socket_dir>/<name>.sock`; a name that already
//! contains a `/` is used as a path verbatim. Replies are matched to
//! requests in FIFO order, the endpoint answers each message exactly once.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::{
    ChannelConnection, ChannelConnector, ChannelError, ChannelLink, ChannelMessage, Reply,
};
use crate::codec::ChannelCodec;
use crate::error::CompanionError;

type Pending = Arc<Mutex<VecDeque<oneshot::Sender<Reply>>>>;

#[derive(Debug, Clone)]
pub struct UnixConnector {
    socket_dir: PathBuf,
}

impl UnixConnector {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Socket path for an endpoint name.
    pub fn resolve(&self, endpoint: &str) -> PathBuf {
        if endpoint.contains('/') {
            PathBuf::from(endpoint)
        } else {
            self.socket_dir.join(format!("{endpoint}.sock"))
        }
    }
}

#[async_trait]
impl ChannelConnector for UnixConnector {
    async fn connect(&self, endpoint: &str) -> Result<ChannelLink, ChannelError> {
        let path = self.resolve(endpoint);
        let stream = UnixStream::connect(&path)
            .await
            .map_err(|e| ChannelError::Invalid(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "secondary channel connected");
        Ok(UnixConnection::spawn(stream))
    }
}

// ── UnixConnection ───────────────────────────────────────────────

struct UnixConnection {
    outbound: mpsc::UnboundedSender<(ChannelMessage, oneshot::Sender<Reply>)>,
    shutdown: CancellationToken,
}

impl UnixConnection {
    fn spawn(stream: UnixStream) -> ChannelLink {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, ChannelCodec::new());
        let mut writer = FramedWrite::new(write_half, ChannelCodec::new());

        let (outbound, mut outbound_rx) =
            mpsc::unbounded_channel::<(ChannelMessage, oneshot::Sender<Reply>)>();
        let (error_tx, errors) = mpsc::channel(4);
        let pending: Pending = Arc::default();
        let shutdown = CancellationToken::new();

        // Writer task: register the reply slot, then put the message on the wire.
        {
            let pending = Arc::clone(&pending);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = outbound_rx.recv() => next,
                    };
                    let Some((message, reply)) = next else { break };
                    lock(&pending).push_back(reply);
                    if let Err(e) = writer.send(message).await {
                        warn!(error = %e, "secondary channel write failed");
                        let error = channel_error(e);
                        if let Some(reply) = lock(&pending).pop_back() {
                            let _ = reply.send(Err(error));
                        }
                        break;
                    }
                }
            });
        }

        // Reader task: deliver replies in order; report transport faults.
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let error = loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        next = reader.next() => next,
                    };
                    match next {
                        Some(Ok(message)) => match lock(&pending).pop_front() {
                            Some(reply) => {
                                let _ = reply.send(Ok(message));
                            }
                            None => debug!("unsolicited secondary channel message dropped"),
                        },
                        Some(Err(e)) => break channel_error(e),
                        None => break ChannelError::Interrupted,
                    }
                };
                debug!(error = %error, "secondary channel reader stopped");
                for reply in lock(&pending).drain(..) {
                    let _ = reply.send(Err(error.clone()));
                }
                let _ = error_tx.send(error).await;
            });
        }

        ChannelLink {
            connection: Arc::new(UnixConnection { outbound, shutdown }),
            errors,
        }
    }
}

#[async_trait]
impl ChannelConnection for UnixConnection {
    fn send_with_reply(&self, message: ChannelMessage) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError((_, tx))) = self.outbound.send((message, tx)) {
            let _ = tx.send(Err(ChannelError::Terminated));
        }
        rx
    }

    async fn close(&self) {
        self.shutdown.cancel();
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, VecDeque<oneshot::Sender<Reply>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn channel_error(e: CompanionError) -> ChannelError {
    match e {
        CompanionError::Encoding(detail) => ChannelError::Malformed(detail),
        other => ChannelError::Io(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::UnixListener;
    use tokio_util::codec::Framed;

    fn socket_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("companion-unix-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn endpoint_resolution() {
        let connector = UnixConnector::new("/run/companion");
        assert_eq!(
            connector.resolve("com.example.viewer"),
            PathBuf::from("/run/companion/com.example.viewer.sock")
        );
        assert_eq!(connector.resolve("/tmp/x.sock"), PathBuf::from("/tmp/x.sock"));
    }

    #[tokio::test]
    async fn replies_arrive_in_order() {
        let dir = socket_dir("order");
        let listener = UnixListener::bind(dir.join("echo.sock")).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, ChannelCodec::new());
            let mut n = 0;
            while let Some(Ok(_)) = framed.next().await {
                n += 1;
                framed.send(ChannelMessage::status(format!("reply {n}"))).await.unwrap();
            }
        });

        let link = UnixConnector::new(&dir).connect("echo").await.unwrap();
        let first = link.connection.send_with_reply(ChannelMessage::new());
        let second = link.connection.send_with_reply(ChannelMessage::new());
        assert_eq!(first.await.unwrap().unwrap().status_or_default(), "reply 1");
        assert_eq!(second.await.unwrap().unwrap().status_or_default(), "reply 2");
        link.connection.close().await;
    }

    #[tokio::test]
    async fn missing_endpoint_is_invalid() {
        let dir = socket_dir("missing");
        let err = UnixConnector::new(&dir).connect("nobody").await.err().unwrap();
        assert!(matches!(err, ChannelError::Invalid(_)));
    }

    #[tokio::test]
    async fn peer_hangup_reaches_observer_and_pending_reply() {
        let dir = socket_dir("hangup");
        let listener = UnixListener::bind(dir.join("rude.sock")).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, ChannelCodec::new());
            let _ = framed.next().await;
            // Hang up without answering.
        });

        let mut link = UnixConnector::new(&dir).connect("rude").await.unwrap();
        let reply = link.connection.send_with_reply(ChannelMessage::new());
        let reply = tokio::time::timeout(Duration::from_secs(5), reply)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.unwrap_err(), ChannelError::Interrupted);
        assert_eq!(link.errors.recv().await, Some(ChannelError::Interrupted));
    }
}

//! Frame-buffer handoff over a secondary channel.
//!
//! [`HandoffBridge::share`] hands a local [`SurfaceHandle`] to a named
//! endpoint and waits for its acknowledgement:
//!
//! ```text
//!   validate ─► connect ─► observe errors ─► wrap ─► sendSurface ─► await
//!                  │              │            │                      │
//!                  └──────────────┴────────────┴──── settle once ◄────┘
//!                                                        │
//!                                               close connection
//! ```
//!
//! Four sources race to complete one exchange: the connection's error
//! observer, a wrap failure, the reply, and cancellation of the carrying
//! call. The [`HandoffSession`] lets exactly one of them win; the others
//! are discarded. The connection is closed exactly once after settlement,
//! whichever source won, or by the carrying call's teardown if the call
//! ends first.

mod channel;
mod session;
#[cfg(unix)]
mod unix;

pub use channel::{
    CMD_KEY, ChannelConnection, ChannelConnector, ChannelError, ChannelLink, ChannelMessage,
    ChannelValue, GlobalIdWrapper, NO_STATUS, Reply, SEND_SURFACE, STATUS_KEY, SURFACE_KEY,
    SurfaceHandle, SurfaceToken, SurfaceWrapper,
};
pub use session::{HandoffOutcome, HandoffPhase, HandoffSession};
#[cfg(unix)]
pub use unix::UnixConnector;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FailureDescriptor;
use crate::latch::Settlement;
use crate::teardown::TeardownContext;

/// Shares surfaces with other processes through a [`ChannelConnector`].
#[derive(Clone)]
pub struct HandoffBridge {
    connector: Arc<dyn ChannelConnector>,
    wrapper: Arc<dyn SurfaceWrapper>,
}

impl HandoffBridge {
    pub fn new(connector: Arc<dyn ChannelConnector>, wrapper: Arc<dyn SurfaceWrapper>) -> Self {
        Self { connector, wrapper }
    }

    /// Send `surface` to `endpoint` and return the endpoint's status text.
    ///
    /// An empty endpoint fails with an invalid-argument failure before any
    /// connection is attempted. A reply without a status yields
    /// [`NO_STATUS`]. Every other failure is internal.
    ///
    /// The exchange releases its connection as soon as it settles. Its
    /// release is also registered on `teardown`, the carrying call's
    /// context, so a call that ends while the exchange is in flight closes
    /// the connection before its own outcome is surfaced.
    pub async fn share(
        &self,
        surface: &SurfaceHandle,
        endpoint: &str,
        cancel: &CancellationToken,
        teardown: &TeardownContext,
    ) -> Result<String, FailureDescriptor> {
        let (session, settlement) = HandoffSession::new(endpoint)?;
        let session = Arc::new(session);

        let resources = TeardownContext::new();
        {
            let resources = resources.clone();
            teardown.add_cleanup("release surface handoff", move || async move {
                resources.drain().await;
                Ok(())
            });
        }

        let outcome = self
            .exchange(Arc::clone(&session), settlement, surface, cancel, resources.clone())
            .await;
        let released = resources.drain().await;
        debug!(endpoint, released, "handoff resources released");

        match &outcome {
            Ok(status) => info!(endpoint, surface = surface.id(), %status, "surface handed off"),
            Err(failure) => warn!(endpoint, surface = surface.id(), %failure, "surface handoff failed"),
        }
        outcome
    }

    async fn exchange(
        &self,
        session: Arc<HandoffSession>,
        settlement: Settlement<HandoffOutcome>,
        surface: &SurfaceHandle,
        cancel: &CancellationToken,
        teardown: TeardownContext,
    ) -> Result<String, FailureDescriptor> {
        // Registered first so it runs last, after the connection is gone.
        {
            let session = Arc::clone(&session);
            teardown.defer("close handoff session", move || session.close());
        }
        session
            .begin_connect()
            .map_err(|e| FailureDescriptor::internal(e.to_string()))?;

        // Completion source: cancellation of the carrying call.
        {
            let session = Arc::clone(&session);
            let cancel = cancel.clone();
            let watcher = tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        session.settle(Err(FailureDescriptor::cancelled()));
                    }
                    _ = session.settled() => {}
                }
            });
            teardown.defer("stop cancellation watcher", move || watcher.abort());
        }

        debug!(endpoint = session.endpoint(), "connecting secondary channel");
        let connected = tokio::select! {
            biased;
            _ = session.settled() => return finish(settlement).await,
            connected = self.connector.connect(session.endpoint()) => connected,
        };
        let ChannelLink {
            connection,
            mut errors,
        } = match connected {
            Ok(link) => link,
            Err(e) => {
                session.settle(Err(connection_error(&e)));
                return finish(settlement).await;
            }
        };

        {
            let connection = Arc::clone(&connection);
            teardown.add_cleanup("close secondary connection", move || async move {
                connection.close().await;
                Ok(())
            });
        }

        // Completion source: connection-level errors.
        {
            let session = Arc::clone(&session);
            let observer = tokio::spawn(async move {
                if let Some(e) = errors.recv().await {
                    session.settle(Err(connection_error(&e)));
                }
            });
            teardown.defer("stop error observer", move || observer.abort());
        }

        // Completion source: wrap failure.
        let token = match self.wrapper.wrap(surface) {
            Ok(token) => token,
            Err(failure) => {
                session.settle(Err(failure));
                return finish(settlement).await;
            }
        };

        if session.begin_await_reply().is_err() {
            // Already settled by another source while connecting.
            return finish(settlement).await;
        }

        // Completion source: the reply.
        let reply = connection.send_with_reply(ChannelMessage::send_surface(token));
        {
            let session = Arc::clone(&session);
            let delivery = tokio::spawn(async move {
                let outcome = match reply.await {
                    Ok(Ok(message)) => Ok(message.status_or_default()),
                    Ok(Err(e)) => Err(reply_error(&e.to_string())),
                    Err(_) => Err(reply_error("reply dropped")),
                };
                session.settle(outcome);
            });
            teardown.defer("stop reply delivery", move || delivery.abort());
        }

        finish(settlement).await
    }
}

impl std::fmt::Debug for HandoffBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffBridge").finish_non_exhaustive()
    }
}

async fn finish(settlement: Settlement<HandoffOutcome>) -> HandoffOutcome {
    settlement
        .wait()
        .await
        .unwrap_or_else(|| Err(FailureDescriptor::internal("handoff session abandoned")))
}

fn connection_error(e: &ChannelError) -> FailureDescriptor {
    FailureDescriptor::internal(format!("secondary channel connection error: {e}"))
}

fn reply_error(detail: &str) -> FailureDescriptor {
    FailureDescriptor::internal(format!("secondary channel reply error: {detail}"))
}

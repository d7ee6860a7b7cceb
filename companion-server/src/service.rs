//! Companion service core logic.
//!
//! Owns the call listener and wires the gateway's collaborators from
//! configuration. Each accepted connection is served on its own task
//! until the peer leaves or the service is stopped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use companion_core::{
    Collaborators, CommandExecutor, FailureDescriptor, Gateway, GlobalIdWrapper, HandlerTable,
    HandoffBridge, Logger, SurfaceHandle, Target, TracingLogger, TracingReporter,
    serve_connection,
};

use crate::config::CompanionConfig;

// ── Collaborators from config ────────────────────────────────────

/// Target described entirely by configuration.
pub struct ConfiguredTarget {
    udid: String,
    logger: Option<Arc<dyn Logger>>,
}

impl ConfiguredTarget {
    pub fn new(config: &CompanionConfig) -> Self {
        let logger = config.target.attach_logger.then(|| {
            Arc::new(TracingLogger::new(format!("target:{}", config.target.udid))) as Arc<dyn Logger>
        });
        Self {
            udid: config.target.udid.clone(),
            logger,
        }
    }
}

impl Target for ConfiguredTarget {
    fn udid(&self) -> &str {
        &self.udid
    }

    fn logger(&self) -> Option<Arc<dyn Logger>> {
        self.logger.clone()
    }
}

/// Executor used when no device backend is linked in: serves the
/// configured main-screen surface and reports everything else unsupported.
pub struct DetachedExecutor {
    surface_id: Option<u32>,
}

impl DetachedExecutor {
    pub fn new(config: &CompanionConfig) -> Self {
        Self {
            surface_id: config.handoff.surface_id,
        }
    }
}

#[async_trait]
impl CommandExecutor for DetachedExecutor {
    async fn main_screen_surface(&self) -> Result<SurfaceHandle, FailureDescriptor> {
        self.surface_id
            .map(SurfaceHandle::new)
            .ok_or_else(|| FailureDescriptor::new("No IOSurface available: no device attached"))
    }
}

/// Build the gateway the service dispatches through.
pub fn build_gateway(config: &CompanionConfig) -> Gateway {
    let collaborators = Collaborators {
        target: Arc::new(ConfiguredTarget::new(config)),
        executor: Arc::new(DetachedExecutor::new(config)),
        reporter: Arc::new(TracingReporter),
        logger: Arc::new(TracingLogger::new("companion")),
        handoff: HandoffBridge::new(handoff_connector(config), Arc::new(GlobalIdWrapper)),
    };
    Gateway::new(collaborators, HandlerTable::standard())
}

#[cfg(unix)]
fn handoff_connector(config: &CompanionConfig) -> Arc<dyn companion_core::ChannelConnector> {
    Arc::new(companion_core::UnixConnector::new(&config.handoff.socket_dir))
}

#[cfg(not(unix))]
fn handoff_connector(_config: &CompanionConfig) -> Arc<dyn companion_core::ChannelConnector> {
    use companion_core::handoff::{ChannelConnector, ChannelError, ChannelLink};

    struct Unavailable;

    #[async_trait]
    impl ChannelConnector for Unavailable {
        async fn connect(&self, endpoint: &str) -> Result<ChannelLink, ChannelError> {
            Err(ChannelError::Invalid(format!(
                "{endpoint}: secondary channel not available on this platform"
            )))
        }
    }

    Arc::new(Unavailable)
}

// ── CompanionService ─────────────────────────────────────────────

pub struct CompanionService {
    config: CompanionConfig,
    gateway: Arc<Gateway>,
    stop: CancellationToken,
}

impl CompanionService {
    pub fn new(config: CompanionConfig) -> Self {
        let gateway = Arc::new(build_gateway(&config));
        Self {
            config,
            gateway,
            stop: CancellationToken::new(),
        }
    }

    /// Cancelling the handle stops accepting and ends every connection.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        info!("companion listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections on `listener` until stopped.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let slots = Arc::new(Semaphore::new(self.config.network.max_connections.max(1)));

        loop {
            let accept = tokio::select! {
                _ = self.stop.cancelled() => break,
                result = listener.accept() => result,
            };
            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
                warn!("rejecting {peer}: connection limit reached");
                continue;
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!("{peer}: cannot disable nagle: {e}");
            }

            info!("client connected from {peer}");
            let gateway = Arc::clone(&self.gateway);
            let stop = self.stop.child_token();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(gateway, stream, stop).await {
                    warn!("connection {peer} ended with error: {e}");
                }
                info!("client {peer} disconnected");
                drop(permit);
            });
        }

        info!("companion stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::protocol::MainScreenSurfaceRequest;
    use companion_core::{CallClient, ConnectionInfo, Operation, StatusCode};
    use tokio_test::assert_ok;

    async fn start(config: CompanionConfig) -> (ConnectionInfo, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = CompanionService::new(config);
        let stop = service.stop_handle();
        tokio::spawn(async move { service.serve(listener).await });
        (ConnectionInfo::new(addr.ip().to_string(), addr.port()), stop)
    }

    #[tokio::test]
    async fn detached_executor_reports_unimplemented() {
        let (info, stop) = start(CompanionConfig::default()).await;
        let client = assert_ok!(CallClient::connect(&info).await);

        let (_, status) = client.unary(Operation::ListApps, &b""[..]).await.unwrap();
        assert_eq!(status.code, StatusCode::Unimplemented);
        stop.cancel();
    }

    #[tokio::test]
    async fn missing_surface_is_unavailable() {
        let (info, stop) = start(CompanionConfig::default()).await;
        let client = CallClient::connect(&info).await.unwrap();
        let request = MainScreenSurfaceRequest::new("viewer").to_bytes().unwrap();

        let (_, status) = client
            .unary(Operation::GetMainScreenSurface, request)
            .await
            .unwrap();
        assert_eq!(status.code, StatusCode::Unavailable);
        stop.cancel();
    }

    #[tokio::test]
    async fn target_without_logger_rejects_streaming_ops() {
        let mut config = CompanionConfig::default();
        config.target.attach_logger = false;
        let (info, stop) = start(config).await;
        let client = CallClient::connect(&info).await.unwrap();

        let call = client.open(Operation::Record).await.unwrap();
        call.half_close().await.unwrap();
        let (_, status) = call.finish().await.unwrap();
        assert_eq!(status.code, StatusCode::Internal);
        assert_eq!(status.message, "Target logger not configured");
        stop.cancel();
    }
}

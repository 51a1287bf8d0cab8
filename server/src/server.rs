use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use protocol::{
    parse_port, validate_host, Acceptor, ChatCodec, EventBus, Framing, ServerStatus, TcpAcceptor,
    ValidationError, MAX_CHUNK,
};

use crate::client_handler::ClientHandler;
use crate::roster::Roster;
use crate::server_listener::ServerListener;
use crate::server_types::ServerError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub framing: Framing,
    pub handshake_timeout: Duration,
    pub max_chunk: usize,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerConfig {
            host: host.into(),
            port,
            ..ServerConfig::default()
        }
    }

    /// Build from user supplied text, e.g. form fields.
    pub fn parse(host: &str, port: &str) -> Result<Self, ValidationError> {
        validate_host(host)?;
        Ok(ServerConfig::new(host.trim(), parse_port(port)?))
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn codec(&self) -> ChatCodec {
        ChatCodec::new(self.framing).with_max_chunk(self.max_chunk)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            framing: Framing::Raw,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_chunk: MAX_CHUNK,
        }
    }
}

pub struct ChatServer;

impl ChatServer {
    /// Bind and start accepting. Nothing is left behind if binding fails.
    pub async fn start(config: ServerConfig, events: EventBus) -> Result<ServerHandle, ServerError> {
        validate_host(&config.host)?;

        let endpoint = format!("{}:{}", config.host, config.port);
        let acceptor = TcpAcceptor::bind(&config.host, config.port)
            .await
            .map_err(|source| ServerError::Bind { endpoint, source })?;

        Ok(ChatServer::start_with(acceptor, config, events))
    }

    /// Start accepting from a caller provided acceptor.
    pub fn start_with<A>(acceptor: A, config: ServerConfig, events: EventBus) -> ServerHandle
    where
        A: Acceptor + 'static,
    {
        let port = acceptor.local_addr().map(|addr| addr.port()).unwrap_or(config.port);
        let host = config.host.clone();

        let shutdown = CancellationToken::new();
        let roster = Roster::new(shutdown.clone());
        let handler = ClientHandler::new(
            config.codec(),
            config.handshake_timeout,
            roster.clone(),
            events.clone(),
            shutdown.clone(),
        );
        let accepting = Arc::new(AtomicBool::new(true));

        info!(%host, port, framing = %config.framing, "server starting");
        events.server_status(ServerStatus::Running { host: host.clone(), port });
        events.message(format!("Server started on {host}:{port}"));

        let accept_task = ServerListener::spawn_accept(
            acceptor,
            handler,
            shutdown.clone(),
            Arc::clone(&accepting),
            events.clone(),
        );

        ServerHandle {
            host,
            port,
            roster,
            events,
            shutdown,
            accepting,
            stopped: AtomicBool::new(false),
            accept_task: Mutex::new(Some(accept_task)),
        }
    }
}

pub struct ServerHandle {
    host: String,
    port: u16,
    roster: Roster,
    events: EventBus,
    shutdown: CancellationToken,
    accepting: Arc<AtomicBool>,
    stopped: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerHandle {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Bound port, the ephemeral one when started on port 0.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// True while the accept loop is alive and no stop was requested.
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && self.accepting.load(Ordering::Acquire)
    }

    pub async fn nicknames(&self) -> Vec<String> {
        self.roster.nicknames().await
    }

    pub async fn client_count(&self) -> usize {
        self.roster.len().await
    }

    /// Stop accepting, force-close every connection and empty the roster.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(host = %self.host, port = self.port, "server stopping");

        // cancel before draining so a late handshake cannot slip into the roster
        self.shutdown.cancel();

        let peers = self.roster.drain().await;
        for peer in &peers {
            peer.close().await;
        }

        self.events.roster(Vec::new());
        self.events.server_status(ServerStatus::Stopped);
        self.events.message("Server stopped");

        let accept_task = self.accept_task.lock().await.take();
        if let Some(task) = accept_task {
            if let Err(err) = task.await {
                warn!(error = %err, "accept loop ended abnormally");
            }
        }

        info!(closed = peers.len(), "server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        // wakes the accept loop and every receive loop
        self.shutdown.cancel();
    }
}

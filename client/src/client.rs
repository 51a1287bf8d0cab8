use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::select;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use protocol::{
    validate_host, validate_nickname, BoxedReader, BoxedWriter, ChatCodec, ClientStatus, Connector,
    EventBus, Stream, TcpConnector, HANDSHAKE_TOKEN,
};

use crate::types::{ClientConfig, ClientError};

const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

type FrRead = FramedRead<BoxedReader, ChatCodec>;
type SharedWriter = Arc<Mutex<FramedWrite<BoxedWriter, ChatCodec>>>;

// One live connection. A new id per connect keeps a stale receive loop
// from tearing down a later session.
struct Session {
    id: u64,
    nickname: String,
    writer: SharedWriter,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ClientState {
    session: Option<Session>,
    next_session: u64,
}

struct Inner {
    events: EventBus,
    state: Mutex<ClientState>,
}

/// Chat client: one outbound connection at a time, a receive loop in its own
/// task and a send path driven by the caller.
#[derive(Clone)]
pub struct Client {
    connector: Arc<dyn Connector>,
    codec: ChatCodec,
    connect_timeout: Duration,
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(config: ClientConfig, events: EventBus) -> Self {
        Client::with_connector(Arc::new(TcpConnector), config, events)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, config: ClientConfig, events: EventBus) -> Self {
        Client {
            connector,
            codec: config.codec(),
            connect_timeout: config.connect_timeout,
            inner: Arc::new(Inner {
                events,
                state: Mutex::new(ClientState::default()),
            }),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.session.is_some()
    }

    pub async fn nickname(&self) -> Option<String> {
        self.inner.state.lock().await.session.as_ref().map(|s| s.nickname.clone())
    }

    /// Open a connection and identify with `nickname`. Bad input is rejected
    /// before any network call.
    pub async fn connect(&self, host: &str, port: u16, nickname: &str) -> Result<(), ClientError> {
        validate_host(host)?;
        validate_nickname(nickname)?;
        let host = host.trim();

        // held across the connect so two callers cannot both open a session
        let mut state = self.inner.state.lock().await;
        if state.session.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let endpoint = format!("{host}:{port}");
        info!(%endpoint, nickname, "client connecting");

        let stream = match timeout(self.connect_timeout, self.connector.connect(host, port)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ClientError::Connect { endpoint, source }),
            Err(_) => {
                let source = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                return Err(ClientError::Connect { endpoint, source });
            }
        };

        let Stream { reader, writer, peer } = stream;
        let fr = FramedRead::new(reader, self.codec);
        let mut fw = FramedWrite::new(writer, self.codec);

        // sent up front, it answers the server's first NICK
        if let Err(err) = fw.send(Bytes::copy_from_slice(nickname.as_bytes())).await {
            warn!(%endpoint, error = %err, "handshake failed");
            let _ = timeout(CLOSE_TIMEOUT, fw.close()).await;
            return Err(ClientError::Handshake(err));
        }

        state.next_session += 1;
        let session = Session {
            id: state.next_session,
            nickname: nickname.to_owned(),
            writer: Arc::new(Mutex::new(fw)),
            cancel: CancellationToken::new(),
        };

        tokio::spawn(receive_loop(
            Arc::clone(&self.inner),
            session.id,
            session.nickname.clone(),
            fr,
            Arc::clone(&session.writer),
            session.cancel.clone(),
        ));

        state.session = Some(session);
        drop(state);

        info!(%peer, "client connected");
        self.inner.events.client_status(ClientStatus::Connected {
            host: host.to_owned(),
            port,
        });
        self.inner.events.message(format!("Connected to server at {endpoint}"));

        Ok(())
    }

    /// Close the connection. Returns false if there was nothing to close.
    pub async fn disconnect(&self) -> bool {
        self.inner.end_session(None, false).await
    }

    /// Send `text` as "nickname: text". Returns `Ok(false)` when there is
    /// nothing to do: not connected, or blank input.
    pub async fn send(&self, text: &str) -> Result<bool, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        let (id, line, writer) = {
            let state = self.inner.state.lock().await;
            let Some(session) = state.session.as_ref() else {
                return Ok(false);
            };
            let line = format!("{}: {}", session.nickname, text);
            (session.id, line, Arc::clone(&session.writer))
        };

        debug!(len = line.len(), "client sending");
        let sent = writer.lock().await.send(Bytes::from(line)).await;

        match sent {
            Ok(()) => Ok(true),
            Err(_) if !self.inner.is_current(id).await => Ok(false),
            Err(err) => {
                self.inner.events.error(format!("Error sending message: {err}"));
                self.inner.end_session(Some(id), false).await;
                Err(ClientError::Send(err))
            }
        }
    }
}

impl Inner {
    // false once a disconnect raced ahead of us
    async fn is_current(&self, id: u64) -> bool {
        self.state.lock().await.session.as_ref().is_some_and(|s| s.id == id)
    }

    // Tear down the current session, or only session `expected` when given.
    async fn end_session(&self, expected: Option<u64>, lost: bool) -> bool {
        let session = {
            let mut state = self.state.lock().await;
            match (&state.session, expected) {
                (Some(s), Some(id)) if s.id != id => None,
                _ => state.session.take(),
            }
        };

        let Some(session) = session else {
            return false;
        };

        if lost {
            self.events.error("Connection lost!");
        }

        session.cancel.cancel();
        let closed = timeout(CLOSE_TIMEOUT, async { session.writer.lock().await.close().await }).await;
        if let Ok(Err(err)) = closed {
            debug!(error = %err, "error closing connection");
        }

        info!(session = session.id, lost, "client disconnected");
        self.events.message("Disconnected from server");
        self.events.client_status(ClientStatus::Disconnected);
        true
    }
}

// Loop to handle server payloads until the session ends
async fn receive_loop(
    inner: Arc<Inner>,
    id: u64,
    nickname: String,
    mut fr: FrRead,
    writer: SharedWriter,
    cancel: CancellationToken,
) {
    let mut first_token_seen = false;

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session = id, "receive loop stopped by disconnect");
                return;
            }
            value = fr.next() => match value {
                Some(Ok(mut payload)) => {
                    // the nickname already went out with the connect
                    if !first_token_seen && payload.starts_with(HANDSHAKE_TOKEN) {
                        first_token_seen = true;
                        let _ = payload.split_to(HANDSHAKE_TOKEN.len());
                        if payload.is_empty() {
                            continue;
                        }
                    } else if payload == HANDSHAKE_TOKEN {
                        debug!(session = id, "server asked for nickname again");
                        let reply = Bytes::copy_from_slice(nickname.as_bytes());
                        if let Err(err) = writer.lock().await.send(reply).await {
                            debug!(session = id, error = %err, "nickname reply failed");
                            break;
                        }
                        continue;
                    }

                    first_token_seen = true;
                    debug!(session = id, len = payload.len(), "client received");
                    inner.events.message(String::from_utf8_lossy(&payload).into_owned());
                }
                Some(Err(err)) => {
                    debug!(session = id, error = %err, "connection read error");
                    break;
                }
                None => {
                    info!(session = id, "server closed the connection");
                    break;
                }
            }
        }
    }

    drop(fr);
    inner.end_session(Some(id), true).await;
}

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use protocol::{BoxedReader, ChatCodec, Envelope, EventBus, Notice, Stream, HANDSHAKE_TOKEN};

use crate::delivery::Delivery;
use crate::roster::{Peer, PeerWriter, Roster};
use crate::server_types::HandshakeError;

type FrRead = FramedRead<BoxedReader, ChatCodec>;

// Handles server communication from one client
// Essentially this models a client actor on the server side
#[derive(Clone)]
pub struct ClientHandler {
    codec: ChatCodec,
    handshake_timeout: Duration,
    roster: Roster,
    delivery: Delivery,
    events: EventBus,
    shutdown: CancellationToken,
}

impl ClientHandler {
    pub fn new(
        codec: ChatCodec,
        handshake_timeout: Duration,
        roster: Roster,
        events: EventBus,
        shutdown: CancellationToken,
    ) -> Self {
        let delivery = Delivery::new(&roster, &events);
        Self {
            codec,
            handshake_timeout,
            roster,
            delivery,
            events,
            shutdown,
        }
    }

    // Spawn tokio task to handle server socket reads from one client
    pub fn spawn(h: ClientHandler, stream: Stream) -> JoinHandle<()> {
        tokio::spawn(async move { h.run(stream).await })
    }

    /// Handshake, join the roster, then relay until the peer goes away.
    pub async fn run(self, stream: Stream) {
        let Stream { reader, writer, peer: addr } = stream;
        let mut fr = FramedRead::new(reader, self.codec);
        let mut fw = FramedWrite::new(writer, self.codec);

        let nickname = match self.register(&mut fr, &mut fw).await {
            Ok(nickname) => nickname,
            Err(err) => {
                warn!(peer = %addr, error = %err, "handshake failed, dropping connection");
                return;
            }
        };

        let Some(peer) = self.roster.add(nickname, addr, fw).await else {
            debug!("server stopped during handshake");
            return;
        };

        info!(peer = peer.id(), addr = peer.addr(), nickname = peer.nickname(), "client joined");
        self.events.roster(self.roster.nicknames().await);

        let joined = Envelope::System(Notice::Joined(peer.nickname().to_owned()));
        self.delivery.broadcast_except(joined, Some(peer.id())).await;

        self.handle_read(fr, peer).await;
    }

    // Ask for the nickname and wait for the reply
    async fn register(&self, fr: &mut FrRead, fw: &mut PeerWriter) -> Result<String, HandshakeError> {
        fw.send(Bytes::from_static(HANDSHAKE_TOKEN)).await?;

        let reply = select! {
            _ = self.shutdown.cancelled() => return Err(HandshakeError::Shutdown),
            reply = timeout(self.handshake_timeout, fr.next()) => reply,
        };

        match reply {
            Err(_) => Err(HandshakeError::TimedOut(self.handshake_timeout)),
            Ok(Some(Ok(name))) if !name.is_empty() => Ok(String::from_utf8_lossy(&name).into_owned()),
            Ok(Some(Ok(_))) | Ok(None) => Err(HandshakeError::Closed),
            Ok(Some(Err(err))) => Err(err.into()),
        }
    }

    // Loop to handle ongoing client msgs to server
    async fn handle_read(&self, mut fr: FrRead, peer: Arc<Peer>) {
        loop {
            select! {
                biased;
                _ = peer.cancelled() => {
                    // evicted by a failed write, or the server is stopping
                    debug!(peer = peer.id(), "receive loop woken by close");
                    break;
                }
                value = fr.next() => match value {
                    Some(Ok(payload)) if payload.is_empty() => continue,
                    Some(Ok(payload)) => {
                        debug!(peer = peer.id(), len = payload.len(), "server received");

                        let envelope = Envelope::UserText(payload);
                        self.events.message(envelope.display_text());
                        self.delivery.broadcast_except(envelope, Some(peer.id())).await;
                    }
                    Some(Err(err)) => {
                        debug!(peer = peer.id(), error = %err, "connection read error");
                        self.delivery.evict(peer.id()).await;
                        break;
                    }
                    None => {
                        info!(peer = peer.id(), "client connection has closed");
                        self.delivery.evict(peer.id()).await;
                        break;
                    }
                }
            }
        }
    }
}

//! Live set of connected peers and their nicknames.
//!
//! All mutation and every snapshot goes through one mutex. Removal hands the
//! peer to exactly one caller, which is then the only one allowed to close
//! it and announce the departure.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::select;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use protocol::{BoxedWriter, ChatCodec};

use crate::server_types::ConnId;

const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

pub type PeerWriter = FramedWrite<BoxedWriter, ChatCodec>;

pub struct Peer {
    id: ConnId,
    nickname: String,
    addr: String,
    writer: Mutex<PeerWriter>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Peer {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the peer is closed or the server stops.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub async fn send(&self, payload: Bytes) -> io::Result<()> {
        if self.is_closed() {
            return Err(not_connected());
        }

        let mut writer = self.writer.lock().await;
        select! {
            res = writer.send(payload) => res,
            _ = self.cancel.cancelled() => Err(not_connected()),
        }
    }

    // true only for the call that actually closed the connection
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        // wakes the receive loop and any send stuck on a full socket
        self.cancel.cancel();

        let mut writer = self.writer.lock().await;
        match timeout(CLOSE_TIMEOUT, writer.get_mut().shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(peer = self.id, error = %err, "shutdown of closed peer failed"),
            Err(_) => debug!(peer = self.id, "shutdown of closed peer timed out"),
        }

        true
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("nickname", &self.nickname)
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

struct Entries {
    peers: Vec<Arc<Peer>>, // insertion order is display order
    next_id: ConnId,
}

#[derive(Clone)]
pub struct Roster {
    entries: Arc<Mutex<Entries>>,
    shutdown: CancellationToken,
}

impl Roster {
    pub fn new(shutdown: CancellationToken) -> Self {
        Roster {
            entries: Arc::new(Mutex::new(Entries {
                peers: Vec::new(),
                next_id: 1,
            })),
            shutdown,
        }
    }

    /// Insert a handshaken connection. Refused once the server is stopping.
    pub async fn add(&self, nickname: String, addr: String, writer: PeerWriter) -> Option<Arc<Peer>> {
        let mut entries = self.entries.lock().await;

        // stop cancels before it drains, so checking under the lock is enough
        if self.shutdown.is_cancelled() {
            return None;
        }

        let id = entries.next_id;
        entries.next_id += 1;

        let peer = Arc::new(Peer {
            id,
            nickname,
            addr,
            writer: Mutex::new(writer),
            cancel: self.shutdown.child_token(),
            closed: AtomicBool::new(false),
        });
        entries.peers.push(Arc::clone(&peer));

        Some(peer)
    }

    // at most one caller gets Some for a given id
    pub async fn remove(&self, id: ConnId) -> Option<Arc<Peer>> {
        let mut entries = self.entries.lock().await;
        let index = entries.peers.iter().position(|p| p.id == id)?;
        Some(entries.peers.remove(index))
    }

    pub async fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.entries.lock().await.peers.clone()
    }

    pub async fn nicknames(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .peers
            .iter()
            .map(|p| p.nickname.clone())
            .collect()
    }

    pub async fn contains(&self, id: ConnId) -> bool {
        self.entries.lock().await.peers.iter().any(|p| p.id == id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Empty the roster, handing every peer to the caller for closing.
    pub async fn drain(&self) -> Vec<Arc<Peer>> {
        std::mem::take(&mut self.entries.lock().await.peers)
    }
}

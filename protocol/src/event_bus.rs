//! Notifications from the network core to whichever thread owns presentation.
//! Producers never block; the consumer drains the receiver at its own pace.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Running { host: String, port: u16 },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStatus {
    Connected { host: String, port: u16 },
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message(String),
    RosterChanged(Vec<String>),
    ServerStatus(ServerStatus),
    ClientStatus(ClientStatus),
    Error(String),
}

pub type EventReceiver = UnboundedReceiver<Event>;

#[derive(Debug, Clone)]
pub struct EventBus {
    event_tx: UnboundedSender<Event>,
}

impl EventBus {
    pub fn new() -> (EventBus, EventReceiver) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (EventBus { event_tx }, event_rx)
    }

    pub fn notify(&self, event: Event) {
        if let Err(err) = self.event_tx.send(event) {
            debug!(event = ?err.0, "event receiver gone, dropping notification");
        }
    }

    pub fn message(&self, text: impl Into<String>) {
        self.notify(Event::Message(text.into()));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.notify(Event::Error(text.into()));
    }

    pub fn roster(&self, nicknames: Vec<String>) {
        self.notify(Event::RosterChanged(nicknames));
    }

    pub fn server_status(&self, status: ServerStatus) {
        self.notify(Event::ServerStatus(status));
    }

    pub fn client_status(&self, status: ClientStatus) {
        self.notify(Event::ClientStatus(status));
    }
}

use std::io;
use std::time::Duration;

use thiserror::Error;

use protocol::{ChatCodec, Framing, ValidationError, MAX_CHUNK};

// client type definitions

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("already connected")]
    AlreadyConnected,

    #[error("unable to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to send nickname: {0}")]
    Handshake(#[source] io::Error),

    #[error("unable to send message: {0}")]
    Send(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub framing: Framing,
    pub max_chunk: usize,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn codec(&self) -> ChatCodec {
        ChatCodec::new(self.framing).with_max_chunk(self.max_chunk)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            framing: Framing::Raw,
            max_chunk: MAX_CHUNK,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

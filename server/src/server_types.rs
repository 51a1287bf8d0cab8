use std::io;
use std::time::Duration;

use thiserror::Error;

use protocol::ValidationError;

// server type definitions

/// Identity of one accepted connection, unique for the life of a server.
pub type ConnId = u64;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unable to listen on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
}

// per connection only, never escapes the connection task
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("peer closed before sending a nickname")]
    Closed,

    #[error("no nickname received within {0:?}")]
    TimedOut(Duration),

    #[error("server is stopping")]
    Shutdown,

    #[error(transparent)]
    Io(#[from] io::Error),
}

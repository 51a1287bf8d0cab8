use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use protocol::{Acceptor, EventBus};

use crate::client_handler::ClientHandler;

pub struct ServerListener;

impl ServerListener {
    /// Accept until stopped. Every connection gets its own task, so a slow
    /// handshake never holds up the next accept.
    pub fn spawn_accept<A>(
        mut acceptor: A,
        handler: ClientHandler,
        shutdown: CancellationToken,
        accepting: Arc<AtomicBool>,
        events: EventBus,
    ) -> JoinHandle<()>
    where
        A: Acceptor + 'static,
    {
        tokio::spawn(async move {
            loop {
                select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!("accept loop stopping");
                        break;
                    }
                    accepted = acceptor.accept() => match accepted {
                        Ok(stream) => {
                            info!(peer = %stream.peer, "server received new client connection");
                            events.message(format!("Connected with {}", stream.peer));
                            ClientHandler::spawn(handler.clone(), stream);
                        }
                        Err(err) if shutdown.is_cancelled() => {
                            debug!(error = %err, "accept failed after stop request");
                            break;
                        }
                        Err(err) => {
                            error!(error = %err, "server abnormally exiting accept loop");
                            events.error(format!("Server error: {err}"));
                            break;
                        }
                    }
                }
            }

            accepting.store(false, Ordering::Release);
        })
    }
}

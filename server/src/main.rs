use std::time::Duration;

use clap::Parser;
use tokio::select;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use protocol::{Event, EventBus, EventReceiver, Framing};
use server::{ChatServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "chat-server", about = "Broadcast chat server", long_about = None)]
struct Args {
    /// Host address to bind to
    #[arg(short = 'H', long, default_value = server::server::DEFAULT_HOST)]
    host: String,

    /// Port to listen on, 0 picks a free one
    #[arg(short, long, default_value_t = server::server::DEFAULT_PORT)]
    port: u16,

    /// Wire framing: raw or length-prefixed
    #[arg(long, default_value_t = Framing::Raw)]
    framing: Framing,

    /// Seconds a new connection has to send its nickname
    #[arg(long, default_value_t = 30)]
    handshake_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    fmt()
        .compact()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = ServerConfig::new(args.host, args.port)
        .with_framing(args.framing)
        .with_handshake_timeout(Duration::from_secs(args.handshake_timeout_secs));

    let (events, event_rx) = EventBus::new();
    let printer = tokio::spawn(print_events(event_rx));

    let server = match ChatServer::start(config, events).await {
        Ok(server) => server,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };

    select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                error!(error = %err, "unable to listen for ctrl-c");
            }
        }
        _ = wait_until_stopped(&server) => {}
    }

    info!("shutting down");
    server.stop().await;
    drop(server);

    // remaining events are flushed once the last connection task exits
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
}

// returns once the accept loop gave up on its own
async fn wait_until_stopped(server: &server::ServerHandle) {
    while server.is_running() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

async fn print_events(mut event_rx: EventReceiver) {
    while let Some(event) = event_rx.recv().await {
        match event {
            Event::Message(text) => println!("{text}"),
            Event::RosterChanged(names) => println!("* online ({}): {}", names.len(), names.join(", ")),
            Event::ServerStatus(status) => println!("* status: {status:?}"),
            Event::ClientStatus(_) => {}
            Event::Error(text) => eprintln!("! {text}"),
        }
    }
}

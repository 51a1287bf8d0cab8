use std::time::Duration;

use clap::Parser;
use tokio::select;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use client::{Client, ClientConfig, Input, InputReader};
use protocol::{ClientStatus, Event, EventBus, EventReceiver, Framing};

#[derive(Parser, Debug)]
#[command(name = "chat-client", about = "Terminal chat client", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 8888)]
    port: u16,

    /// Nickname, prompted for when missing
    #[arg(short, long)]
    nickname: Option<String>,

    /// Wire framing: raw or length-prefixed
    #[arg(long, default_value_t = Framing::Raw)]
    framing: Framing,
}

#[tokio::main]
async fn main() {
    fmt()
        .compact()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    let nickname = match args.nickname {
        Some(nickname) => nickname,
        None => match InputReader::blocking_read("Nickname:") {
            Ok(Some(nickname)) => nickname,
            Ok(None) => return,
            Err(err) => {
                error!(error = %err, "unable to read nickname");
                std::process::exit(1);
            }
        },
    };

    let (events, event_rx) = EventBus::new();
    let printer = tokio::spawn(print_events(event_rx));

    let client = Client::new(ClientConfig::default().with_framing(args.framing), events);
    if let Err(err) = client.connect(&args.host, args.port, &nickname).await {
        error!("{err}");
        std::process::exit(1);
    }

    info!("type a message and press enter, /quit to leave");
    let mut lines = InputReader::lines();

    loop {
        select! {
            line = lines.next() => match line {
                Some(Ok(line)) => match InputReader::parse_input(&line) {
                    Input::Quit => break,
                    Input::Noop => continue,
                    Input::Message(text) => {
                        if let Err(err) = client.send(&text).await {
                            debug!(error = %err, "send failed");
                            break;
                        }
                    }
                },
                Some(Err(err)) => {
                    error!(error = %err, "unable to read input");
                    break;
                }
                None => break,
            },
            _ = wait_until_disconnected(&client) => break,
        }
    }

    client.disconnect().await;
    drop(client);

    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
}

// returns once the receive loop gave up on the connection
async fn wait_until_disconnected(client: &Client) {
    while client.is_connected().await {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

async fn print_events(mut event_rx: EventReceiver) {
    while let Some(event) = event_rx.recv().await {
        match event {
            Event::Message(text) => println!("{text}"),
            Event::ClientStatus(ClientStatus::Connected { host, port }) => {
                println!("* status: connected to {host}:{port}")
            }
            Event::ClientStatus(ClientStatus::Disconnected) => println!("* status: disconnected"),
            Event::Error(text) => eprintln!("! {text}"),
            Event::RosterChanged(_) | Event::ServerStatus(_) => {}
        }
    }
}

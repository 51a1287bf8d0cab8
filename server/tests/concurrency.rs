use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use protocol::{EventBus, HANDSHAKE_TOKEN};
use server::{ChatServer, ServerConfig, ServerHandle};

const WAIT: Duration = Duration::from_secs(5);

async fn join(port: u16, nickname: String) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let mut token = [0u8; 4];
    stream.read_exact(&mut token).await?;
    if token != HANDSHAKE_TOKEN {
        bail!("expected handshake token, got {token:?}");
    }
    stream.write_all(nickname.as_bytes()).await?;
    Ok(stream)
}

async fn wait_for_count(server: &ServerHandle, count: usize) -> Result<()> {
    timeout(WAIT, async {
        while server.client_count().await != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}

// true once the server side has closed the socket
async fn closed_by_server(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1024];
    let drained = timeout(WAIT, async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await;
    drained.is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connects_and_disconnects_keep_roster_consistent() -> Result<()> {
    const N: usize = 24;
    const M: usize = 10;

    let (events, _event_rx) = EventBus::new();
    let server = ChatServer::start(ServerConfig::new("127.0.0.1", 0), events).await?;
    let port = server.port();

    let mut joins = Vec::new();
    for i in 0..N {
        joins.push(tokio::spawn(join(port, format!("user{i:02}"))));
    }
    let mut clients = Vec::new();
    for task in joins {
        clients.push(task.await??);
    }
    wait_for_count(&server, N).await?;

    // the first M leave while the rest keep talking
    let leaving: Vec<TcpStream> = clients.drain(..M).collect();
    let mut tasks = Vec::new();
    for stream in leaving {
        tasks.push(tokio::spawn(async move {
            drop(stream);
        }));
    }
    let mut staying = Vec::new();
    for (i, mut stream) in clients.into_iter().enumerate() {
        staying.push(tokio::spawn(async move {
            for n in 0..5 {
                let line = format!("user{:02}: message {n}", i + M);
                if stream.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                sleep(Duration::from_millis(2)).await;
            }
            stream
        }));
    }
    for task in tasks {
        task.await?;
    }
    let mut remaining = Vec::new();
    for task in staying {
        remaining.push(task.await?);
    }

    wait_for_count(&server, N - M).await?;

    let expected: BTreeSet<String> = (M..N).map(|i| format!("user{i:02}")).collect();
    let actual: BTreeSet<String> = server.nicknames().await.into_iter().collect();
    assert_eq!(actual, expected);

    server.stop().await;
    assert_eq!(server.client_count().await, 0);
    for stream in remaining.iter_mut() {
        assert!(closed_by_server(stream).await);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn relay_reaches_everyone_but_the_sender() -> Result<()> {
    let (events, _event_rx) = EventBus::new();
    let server = ChatServer::start(ServerConfig::new("127.0.0.1", 0), events).await?;
    let port = server.port();

    let mut sender = join(port, "sender".into()).await?;
    wait_for_count(&server, 1).await?;

    let mut listeners = Vec::new();
    for i in 0..3 {
        listeners.push(join(port, format!("listener{i}")).await?);
        wait_for_count(&server, i + 2).await?;
    }

    // drain the join notices so only the relayed text is left
    sleep(Duration::from_millis(100)).await;
    let mut scratch = [0u8; 1024];
    while timeout(Duration::from_millis(50), sender.read(&mut scratch)).await.is_ok() {}
    for listener in listeners.iter_mut() {
        while timeout(Duration::from_millis(50), listener.read(&mut scratch)).await.is_ok() {}
    }

    sender.write_all(b"sender: hello all").await?;

    for listener in listeners.iter_mut() {
        let mut buf = [0u8; 17];
        timeout(WAIT, listener.read_exact(&mut buf)).await??;
        assert_eq!(&buf, b"sender: hello all");
    }

    let echoed = timeout(Duration::from_millis(200), sender.read(&mut scratch)).await;
    assert!(echoed.is_err(), "sender must not get its own message back");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn stop_unblocks_clients_and_empties_roster() -> Result<()> {
    let (events, _event_rx) = EventBus::new();
    let server = ChatServer::start(ServerConfig::new("127.0.0.1", 0), events).await?;
    let port = server.port();

    let mut a = join(port, "a".into()).await?;
    let mut b = join(port, "b".into()).await?;
    wait_for_count(&server, 2).await?;

    server.stop().await;

    assert!(server.nicknames().await.is_empty());
    assert!(!server.is_running());
    assert!(closed_by_server(&mut a).await);
    assert!(closed_by_server(&mut b).await);

    // nothing is listening any more
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    Ok(())
}

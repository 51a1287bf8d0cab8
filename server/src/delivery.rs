use std::collections::VecDeque;

use tracing::{debug, info, warn};

use protocol::{Envelope, EventBus, Notice};

use crate::roster::Roster;
use crate::server_types::ConnId;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// deliveries tried for the payload itself, not the leave notices
    pub attempted: usize,
    /// nicknames evicted along the way, cascades included
    pub evicted: Vec<String>,
}

// handles msg delivery back to clients, evicting the ones that fail
#[derive(Clone)]
pub struct Delivery {
    registry: Roster,
    events: EventBus,
}

impl Delivery {
    pub fn new(clients: &Roster, events: &EventBus) -> Self {
        Delivery {
            registry: clients.clone(),
            events: events.clone(),
        }
    }

    pub async fn broadcast(&self, envelope: Envelope) -> DeliveryReport {
        self.broadcast_except(envelope, None).await
    }

    /// Deliver to every roster member except `except`. A failed write evicts
    /// that member and queues its leave notice; the notices are delivered the
    /// same way, so failures met while announcing an eviction are handled too.
    pub async fn broadcast_except(&self, envelope: Envelope, except: Option<ConnId>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut pending = VecDeque::from([(envelope, except)]);
        let mut first = true;

        while let Some((envelope, except)) = pending.pop_front() {
            let payload = envelope.to_wire();
            debug!(system = envelope.is_system(), len = payload.len(), "broadcasting");

            for peer in self.registry.snapshot().await {
                if Some(peer.id()) == except {
                    continue;
                }
                if first {
                    report.attempted += 1;
                }

                if let Err(err) = peer.send(payload.clone()).await {
                    warn!(peer = peer.id(), nickname = peer.nickname(), error = %err, "unable to write to client");

                    if let Some(notice) = self.remove(peer.id()).await {
                        report.evicted.push(notice.nickname().to_owned());
                        pending.push_back((Envelope::System(notice), Some(peer.id())));
                    }
                }
            }

            first = false;
        }

        report
    }

    /// Evict a peer whose read side failed. Returns false when some other
    /// path already removed it.
    pub async fn evict(&self, id: ConnId) -> bool {
        match self.remove(id).await {
            Some(notice) => {
                self.broadcast_except(Envelope::System(notice), Some(id)).await;
                true
            }
            None => false,
        }
    }

    // roster removal, close and observer notice, done once per connection
    async fn remove(&self, id: ConnId) -> Option<Notice> {
        let peer = self.registry.remove(id).await?;
        peer.close().await;

        info!(peer = id, addr = peer.addr(), nickname = peer.nickname(), "client left");

        let notice = Notice::Left(peer.nickname().to_owned());
        self.events.roster(self.registry.nicknames().await);
        self.events.message(notice.to_string());
        Some(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use bytes::Bytes;
    use protocol::{ChatCodec, Event, EventReceiver, Framing};
    use tokio::io::DuplexStream;
    use tokio_stream::StreamExt;
    use tokio_util::codec::FramedRead;
    use tokio_util::sync::CancellationToken;

    use crate::roster::tests::writer_pair;
    use crate::roster::Peer;

    const CODEC: ChatCodec = ChatCodec::new(Framing::LengthPrefixed);

    struct Fixture {
        roster: Roster,
        delivery: Delivery,
        rx: EventReceiver,
    }

    fn fixture() -> Fixture {
        let roster = Roster::new(CancellationToken::new());
        let (events, rx) = EventBus::new();
        let delivery = Delivery::new(&roster, &events);
        Fixture { roster, delivery, rx }
    }

    async fn join(roster: &Roster, name: &str) -> (Arc<Peer>, FramedRead<DuplexStream, ChatCodec>) {
        let (writer, far) = writer_pair(CODEC);
        let peer = roster.add(name.into(), "test".into(), writer).await.unwrap();
        (peer, FramedRead::new(far, CODEC))
    }

    async fn next_payload(fr: &mut FramedRead<DuplexStream, ChatCodec>) -> Bytes {
        tokio::time::timeout(std::time::Duration::from_secs(1), fr.next())
            .await
            .expect("payload in time")
            .expect("stream open")
            .expect("valid frame")
    }

    fn drain_messages(rx: &mut EventReceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Message(text) = event {
                out.push(text);
            }
        }
        out
    }

    #[tokio::test]
    async fn sender_is_skipped() {
        let f = fixture();
        let (alice, mut alice_rx) = join(&f.roster, "alice").await;
        let (_bob, mut bob_rx) = join(&f.roster, "bob").await;

        let report = f
            .delivery
            .broadcast_except(Envelope::UserText(Bytes::from_static(b"alice: hi")), Some(alice.id()))
            .await;

        assert_eq!(report.attempted, 1);
        assert!(report.evicted.is_empty());
        assert_eq!(next_payload(&mut bob_rx).await, Bytes::from_static(b"alice: hi"));

        // nothing queued for the sender
        f.delivery.broadcast(Envelope::System(Notice::Joined("zed".into()))).await;
        assert_eq!(next_payload(&mut alice_rx).await, Bytes::from_static(b"zed joined the chat!"));
    }

    #[tokio::test]
    async fn failed_writes_evict_and_announce() {
        let mut f = fixture();
        let (_a, mut a_rx) = join(&f.roster, "a").await;
        let (_b, b_rx) = join(&f.roster, "b").await;
        let (_c, c_rx) = join(&f.roster, "c").await;
        let (_d, mut d_rx) = join(&f.roster, "d").await;
        drop(b_rx);
        drop(c_rx);

        let report = f.delivery.broadcast(Envelope::UserText(Bytes::from_static(b"x: ping"))).await;

        assert_eq!(report.attempted, 4);
        assert_eq!(report.evicted, vec!["b", "c"]);
        assert_eq!(f.roster.nicknames().await, vec!["a", "d"]);

        for rx in [&mut a_rx, &mut d_rx] {
            assert_eq!(next_payload(rx).await, Bytes::from_static(b"x: ping"));
            let mut notices = vec![next_payload(rx).await, next_payload(rx).await];
            notices.sort();
            assert_eq!(
                notices,
                vec![Bytes::from_static(b"b left the chat!"), Bytes::from_static(b"c left the chat!")]
            );
        }

        assert_eq!(drain_messages(&mut f.rx), vec!["b left the chat!", "c left the chat!"]);
    }

    // accepts `budget` writes, then behaves like a reset connection
    struct FlakyWriter {
        budget: usize,
    }

    impl tokio::io::AsyncWrite for FlakyWriter {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            if self.budget == 0 {
                return std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()));
            }
            self.budget -= 1;
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failure_while_announcing_an_eviction_cascades() {
        let mut f = fixture();
        let (sender, mut sender_rx) = join(&f.roster, "sender").await;
        let (_gone, gone_rx) = join(&f.roster, "gone").await;
        let flaky: protocol::BoxedWriter = Box::new(FlakyWriter { budget: 1 });
        f.roster
            .add("flaky".into(), "test".into(), tokio_util::codec::FramedWrite::new(flaky, CODEC))
            .await
            .unwrap();
        let (_stays, mut stays_rx) = join(&f.roster, "stays").await;
        drop(gone_rx);

        let report = f
            .delivery
            .broadcast_except(Envelope::UserText(Bytes::from_static(b"sender: hi")), Some(sender.id()))
            .await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.evicted, vec!["gone", "flaky"]);
        assert_eq!(f.roster.nicknames().await, vec!["sender", "stays"]);

        assert_eq!(next_payload(&mut stays_rx).await, Bytes::from_static(b"sender: hi"));
        assert_eq!(next_payload(&mut stays_rx).await, Bytes::from_static(b"gone left the chat!"));
        assert_eq!(next_payload(&mut stays_rx).await, Bytes::from_static(b"flaky left the chat!"));
        assert_eq!(next_payload(&mut sender_rx).await, Bytes::from_static(b"gone left the chat!"));
        assert_eq!(next_payload(&mut sender_rx).await, Bytes::from_static(b"flaky left the chat!"));
        assert_eq!(drain_messages(&mut f.rx), vec!["gone left the chat!", "flaky left the chat!"]);
    }

    #[tokio::test]
    async fn concurrent_eviction_happens_once() {
        let mut f = fixture();
        let (victim, _victim_rx) = join(&f.roster, "victim").await;
        let (_other, mut other_rx) = join(&f.roster, "other").await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let delivery = f.delivery.clone();
            let id = victim.id();
            tasks.push(tokio::spawn(async move { delivery.evict(id).await }));
        }

        let mut evicted = 0;
        for task in tasks {
            if task.await.unwrap() {
                evicted += 1;
            }
        }

        assert_eq!(evicted, 1);
        assert!(victim.is_closed());
        assert_eq!(next_payload(&mut other_rx).await, Bytes::from_static(b"victim left the chat!"));
        assert_eq!(drain_messages(&mut f.rx), vec!["victim left the chat!"]);
    }
}

//! End-to-end failover tests.
//!
//! Runs the real resolver, watcher, and accept loop against a fake sentinel
//! and loopback masters, then drives traffic through the relay.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use masterlink_core::RetryPolicy;
use masterlink_proxy::{RelayContext, RelaySettings, serve};
use masterlink_sentinel::{DiscoverySettings, MasterAddressResolver, SentinelAddress};
use masterlink_watcher::{MasterHandle, MasterWatcher, WatchEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const POLL: Duration = Duration::from_millis(100);

/// Sentinel stand-in whose advertised master can be switched. Like a real
/// sentinel it leaves each connection open after replying.
struct FakeSentinel {
    addr: SocketAddr,
    master: Arc<Mutex<SocketAddr>>,
}

impl FakeSentinel {
    async fn start(master: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve_on(listener, master)
    }

    fn serve_on(listener: TcpListener, master: SocketAddr) -> Self {
        let addr = listener.local_addr().unwrap();
        let master = Arc::new(Mutex::new(master));
        let advertised = master.clone();

        tokio::spawn(async move {
            while let Ok((mut conn, _)) = listener.accept().await {
                let current = *advertised.lock().unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 128];
                    let _ = conn.read(&mut buf).await;
                    let host = current.ip().to_string();
                    let port = current.port().to_string();
                    let reply = format!(
                        "*2\r\n${}\r\n{host}\r\n${}\r\n{port}\r\n",
                        host.len(),
                        port.len()
                    );
                    let _ = conn.write_all(reply.as_bytes()).await;
                    // A real sentinel keeps the connection open.
                    let _ = conn.read(&mut buf).await;
                });
            }
        });

        Self { addr, master }
    }

    fn advertise(&self, master: SocketAddr) {
        *self.master.lock().unwrap() = master;
    }
}

/// A master that greets each connection with its name, then echoes.
async fn named_master(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = listener.accept().await {
            tokio::spawn(async move {
                if conn.write_all(name.as_bytes()).await.is_err() {
                    return;
                }
                let (mut r, mut w) = conn.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

fn discovery_settings() -> DiscoverySettings {
    DiscoverySettings {
        query: RetryPolicy::fixed(1, Duration::ZERO, Duration::from_millis(500)),
        reresolve: RetryPolicy::unbounded(Duration::from_millis(10), Duration::from_millis(500)),
        verify_master: true,
        reply_buffer: 256,
    }
}

fn relay_settings() -> RelaySettings {
    RelaySettings {
        unknown_wait: RetryPolicy::fixed(5, POLL, POLL),
        dial: RetryPolicy::fixed(5, Duration::from_millis(20), Duration::from_millis(500)),
    }
}

struct Relay {
    listen: SocketAddr,
    master: MasterHandle,
    ctx: RelayContext,
    shutdown: watch::Sender<bool>,
}

/// Start a watcher and accept loop against `sentinel`.
async fn start_relay(sentinel: SocketAddr) -> Relay {
    let resolver = Arc::new(MasterAddressResolver::new(
        SentinelAddress::with_resolved(&sentinel.to_string(), sentinel),
        "mymaster",
        discovery_settings(),
    ));
    let watcher = MasterWatcher::new(resolver.clone(), POLL);
    let master = watcher.handle();
    let ctx = RelayContext::new(master.clone(), resolver, relay_settings());

    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(watcher.run(shutdown_rx.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listen = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, ctx.clone(), shutdown_rx));

    Relay {
        listen,
        master,
        ctx,
        shutdown,
    }
}

async fn wait_for_master(handle: &MasterHandle, expected: SocketAddr) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.address() != Some(expected) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "watcher never reported {expected}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn read_greeting(client: &mut TcpStream) -> String {
    let mut buf = [0u8; 1];
    client.read_exact(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn payload_round_trips_unmodified() {
    let master = named_master("A").await;
    let sentinel = FakeSentinel::start(master).await;
    let relay = start_relay(sentinel.addr).await;
    wait_for_master(&relay.master, master).await;

    let mut client = TcpStream::connect(relay.listen).await.unwrap();
    assert_eq!(read_greeting(&mut client).await, "A");

    let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();
    let (mut r, mut w) = client.split();
    let send = async {
        w.write_all(&payload).await.unwrap();
        w.shutdown().await.unwrap();
    };
    let mut echoed = Vec::new();
    let recv = r.read_to_end(&mut echoed);
    let ((), read) = tokio::join!(send, recv);
    read.unwrap();

    assert_eq!(echoed.len(), payload.len());
    assert_eq!(echoed, payload);

    let _ = relay.shutdown.send(true);
}

#[tokio::test]
async fn failover_closes_stale_clients_and_routes_new_ones() {
    let old_master = named_master("A").await;
    let new_master = named_master("B").await;
    let sentinel = FakeSentinel::start(old_master).await;
    let relay = start_relay(sentinel.addr).await;
    wait_for_master(&relay.master, old_master).await;

    let mut stale = TcpStream::connect(relay.listen).await.unwrap();
    assert_eq!(read_greeting(&mut stale).await, "A");
    stale.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stale.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    sentinel.advertise(new_master);

    // Closed within one poll interval of the watcher noticing.
    let mut rest = [0u8; 16];
    let read = tokio::time::timeout(POLL * 5, stale.read(&mut rest))
        .await
        .expect("stale client should be disconnected");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected read: {read:?}");
    assert_eq!(relay.master.address(), Some(new_master));

    // Reconnecting reaches the new master.
    let mut fresh = TcpStream::connect(relay.listen).await.unwrap();
    assert_eq!(read_greeting(&mut fresh).await, "B");
    drop(fresh);

    // Both relays finish; nothing is left running against the old master.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = relay.ctx.stats.snapshot();
        if stats.active == 0 {
            assert_eq!(stats.accepted, 2);
            assert_eq!(stats.drained, 1);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "relays leaked: {stats:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let _ = relay.shutdown.send(true);
}

#[tokio::test]
async fn sentinel_outage_then_recovery_discovers_once() {
    let master = named_master("A").await;

    // Reserve a port for the sentinel, then leave it closed.
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let sentinel_addr = reserved.local_addr().unwrap();
    drop(reserved);

    let resolver = Arc::new(MasterAddressResolver::new(
        SentinelAddress::with_resolved(&sentinel_addr.to_string(), sentinel_addr),
        "mymaster",
        discovery_settings(),
    ));
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    let mut watcher = MasterWatcher::new(resolver, POLL).with_callback(Arc::new(move |event| {
        recorded.lock().unwrap().push(event.clone());
    }));
    let handle = watcher.handle();

    for _ in 0..3 {
        let event = watcher.tick().await;
        assert!(matches!(event, WatchEvent::LookupFailed { .. }));
    }
    assert_eq!(handle.address(), None);

    let listener = TcpListener::bind(sentinel_addr).await.unwrap();
    let _sentinel = FakeSentinel::serve_on(listener, master);

    watcher.tick().await;
    watcher.tick().await;

    let events = events.lock().unwrap();
    let discovered: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, WatchEvent::Discovered { .. }))
        .collect();
    assert_eq!(discovered.len(), 1);
    assert_eq!(
        discovered[0],
        &WatchEvent::Discovered {
            address: master,
            generation: 1
        }
    );
    assert_eq!(handle.address(), Some(master));
    assert_eq!(handle.generation().id(), 1);
}

#[tokio::test]
async fn client_waits_for_first_discovery() {
    let master = named_master("A").await;
    let sentinel = FakeSentinel::start(master).await;
    let relay = start_relay(sentinel.addr).await;

    // Connect without waiting for the watcher; the relay holds the client
    // until a master is known.
    let mut client = TcpStream::connect(relay.listen).await.unwrap();
    let greeting = tokio::time::timeout(Duration::from_secs(2), read_greeting(&mut client))
        .await
        .expect("relay should reach the master once discovered");
    assert_eq!(greeting, "A");

    let _ = relay.shutdown.send(true);
}

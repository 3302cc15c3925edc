//! Supervisor tests against an in-memory platform and loopback sockets.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use spark_common::TelemetryBatch;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use zenoh_bridge_spark::config::DeviceIdentity;
use zenoh_bridge_spark::error::RemoteError;
use zenoh_bridge_spark::remote::{
    ConnectionEvent, RemoteClient, RemoteHandlers, RemoteSession,
};
use zenoh_bridge_spark::{BridgeStats, ShutdownController, SparkBridgeConfig, Supervisor};

#[derive(Default)]
struct PlatformState {
    batches: Mutex<Vec<TelemetryBatch>>,
    events: Mutex<Vec<ConnectionEvent>>,
    opens: AtomicU32,
    closes: AtomicU32,
    failing_opens: AtomicU32,
    failing_sends: AtomicU32,
}

impl PlatformState {
    fn batches(&self) -> Vec<TelemetryBatch> {
        self.batches.lock().unwrap().clone()
    }

    fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Decrement `counter` if positive; true if it was.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Clone, Default)]
struct MockPlatform {
    state: Arc<PlatformState>,
}

struct MockSession {
    state: Arc<PlatformState>,
    handlers: Arc<dyn RemoteHandlers>,
}

impl RemoteClient for MockPlatform {
    type Session = MockSession;

    async fn open(
        &self,
        identity: &DeviceIdentity,
        handlers: Arc<dyn RemoteHandlers>,
    ) -> Result<MockSession, RemoteError> {
        assert_eq!(identity.unique_id, "lot-01");
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.state.failing_opens) {
            return Err(RemoteError::Open("platform unreachable".to_string()));
        }

        handlers.on_connection_event(ConnectionEvent::Opened);
        Ok(MockSession {
            state: Arc::clone(&self.state),
            handlers,
        })
    }
}

impl RemoteSession for MockSession {
    async fn send(&self, batch: &TelemetryBatch) -> Result<(), RemoteError> {
        if take_one(&self.state.failing_sends) {
            return Err(RemoteError::Transport("link down".to_string()));
        }
        self.state.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn fetch_device_list(&self) -> Result<Vec<String>, RemoteError> {
        Ok(vec!["lot-01".to_string()])
    }

    async fn fetch_twins(&self) -> Result<Vec<Value>, RemoteError> {
        Ok(vec![json!({ "desired": {} })])
    }

    async fn close(self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.handlers.on_connection_event(ConnectionEvent::Closed);
    }
}

/// Handlers that remember connection events.
struct EventRecorder {
    state: Arc<PlatformState>,
}

impl RemoteHandlers for EventRecorder {
    fn on_connection_event(&self, event: ConnectionEvent) {
        self.state.events.lock().unwrap().push(event);
    }
}

fn base_config(mode: &str, port: u16) -> Value {
    json!({
        "ids": { "uniqueId": "lot-01", "sid": "test" },
        "spark_socket_ipv4": "127.0.0.1",
        "spark_socket_port": port,
        "source": {
            "mode": mode,
            "field_order": "taken_empty",
            "backoff": { "min_delay_ms": 20, "max_delay_ms": 80 }
        },
        "telemetry": { "location": [49.0, 11.0] },
        "recovery": {
            "open_timeout_ms": 1000,
            "backoff": { "min_delay_ms": 20, "max_delay_ms": 80 }
        }
    })
}

fn start(config: Value, platform: &MockPlatform) -> (ShutdownController, JoinHandle<BridgeStats>) {
    let config = SparkBridgeConfig::from_json5(&config.to_string()).unwrap();
    let shutdown = ShutdownController::new();
    let supervisor = Supervisor::new(&config, platform.clone(), shutdown.clone())
        .unwrap()
        .with_handlers(Arc::new(EventRecorder {
            state: Arc::clone(&platform.state),
        }));
    (shutdown, tokio::spawn(supervisor.run()))
}

async fn stop(shutdown: ShutdownController, handle: JoinHandle<BridgeStats>) -> BridgeStats {
    shutdown.request_shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("supervisor did not stop")
        .unwrap()
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Accept connections forever; the n-th one (from 1) gets `script(n)`.
/// Streams are kept open until the task is dropped.
fn spawn_producer(
    listener: TcpListener,
    script: impl Fn(u32) -> Option<&'static [u8]> + Send + 'static,
    accepts: Arc<AtomicU32>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut held: Vec<TcpStream> = Vec::new();
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let n = accepts.fetch_add(1, Ordering::SeqCst) + 1;
            match script(n) {
                Some(payload) => {
                    stream.write_all(payload).await.unwrap();
                    held.push(stream);
                }
                None => drop(stream),
            }
        }
    })
}

#[tokio::test]
async fn test_single_reading_published_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicU32::new(0));
    let producer = spawn_producer(listener, |_| Some(&b"3,5\n"[..]), Arc::clone(&accepts));

    let platform = MockPlatform::default();
    let (shutdown, handle) = start(base_config("stream", port), &platform);

    wait_until("a published batch", || !platform.state.batches().is_empty()).await;
    let stats = stop(shutdown, handle).await;

    let batches = platform.state.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);

    let record = &batches[0][0];
    assert_eq!(record.unique_id, "lot-01");
    assert_eq!(record.data.taken, 3);
    assert_eq!(record.data.empty, 5);
    assert_eq!(record.data.location, [49.0, 11.0]);
    assert!(record.time.ends_with(".000Z"));

    assert_eq!(stats.readings, 1);
    assert_eq!(stats.published, 1);
    assert_eq!(stats.session_opens, 1);
    assert_eq!(platform.state.opens(), 1);
    assert_eq!(platform.state.closes(), 1);
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert_eq!(
        *platform.state.events.lock().unwrap(),
        vec![ConnectionEvent::Opened, ConnectionEvent::Closed]
    );

    producer.abort();
}

#[tokio::test]
async fn test_peer_close_tears_down_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicU32::new(0));
    let producer = spawn_producer(
        listener,
        |n| if n == 1 { None } else { Some(&b"4,6\n"[..]) },
        Arc::clone(&accepts),
    );

    let platform = MockPlatform::default();
    let (shutdown, handle) = start(base_config("stream", port), &platform);

    wait_until("a published batch", || !platform.state.batches().is_empty()).await;
    let stats = stop(shutdown, handle).await;

    assert_eq!(accepts.load(Ordering::SeqCst), 2);
    assert_eq!(stats.source_failures, 1);
    assert_eq!(stats.published, 1);
    // One teardown after the peer close, one at shutdown
    assert_eq!(platform.state.opens(), 2);
    assert_eq!(platform.state.closes(), 2);
    assert_eq!(platform.state.batches()[0][0].data.taken, 4);

    producer.abort();
}

#[tokio::test]
async fn test_source_scope_keeps_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicU32::new(0));
    let producer = spawn_producer(
        listener,
        |n| if n == 1 { None } else { Some(&b"4,6\n"[..]) },
        Arc::clone(&accepts),
    );

    let mut config = base_config("stream", port);
    config["recovery"]["scope"] = json!("source");

    let platform = MockPlatform::default();
    let (shutdown, handle) = start(config, &platform);

    wait_until("a published batch", || !platform.state.batches().is_empty()).await;
    assert_eq!(platform.state.closes(), 0);

    let stats = stop(shutdown, handle).await;

    assert_eq!(accepts.load(Ordering::SeqCst), 2);
    assert_eq!(stats.source_failures, 1);
    assert_eq!(platform.state.opens(), 1);
    assert_eq!(platform.state.closes(), 1);

    producer.abort();
}

#[tokio::test]
async fn test_source_scope_backs_off_between_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicU32::new(0));
    // Every connection is accepted and dropped at once
    let producer = spawn_producer(listener, |_| None, Arc::clone(&accepts));

    let mut config = base_config("stream", port);
    config["recovery"]["scope"] = json!("source");
    config["source"]["backoff"] = json!({ "min_delay_ms": 1000, "max_delay_ms": 8000 });

    let platform = MockPlatform::default();
    let (shutdown, handle) = start(config, &platform);

    wait_until("the first accept", || accepts.load(Ordering::SeqCst) >= 1).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(accepts.load(Ordering::SeqCst) <= 2);

    // Shutdown interrupts the reconnect delay
    let requested_at = Instant::now();
    let stats = stop(shutdown, handle).await;
    assert!(requested_at.elapsed() < Duration::from_millis(500));

    assert!(stats.source_failures <= 2);
    assert_eq!(platform.state.opens(), 1);
    assert_eq!(platform.state.closes(), 1);

    producer.abort();
}

#[tokio::test]
async fn test_stream_lines_in_one_chunk_are_all_published() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicU32::new(0));
    let producer = spawn_producer(listener, |_| Some(&b"3,5\n4,6\n"[..]), Arc::clone(&accepts));

    let platform = MockPlatform::default();
    let (shutdown, handle) = start(base_config("stream", port), &platform);

    wait_until("two published batches", || platform.state.batches().len() == 2).await;
    let stats = stop(shutdown, handle).await;

    let batches = platform.state.batches();
    assert_eq!(batches[0][0].data.taken, 3);
    assert_eq!(batches[1][0].data.taken, 4);
    assert_eq!(batches[1][0].data.empty, 6);
    assert_eq!(stats.readings, 2);
    assert_eq!(stats.parse_errors, 0);
    assert_eq!(accepts.load(Ordering::SeqCst), 1);

    producer.abort();
}

#[tokio::test]
async fn test_producer_failure_does_not_grow_session_backoff() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicU32::new(0));
    let producer = spawn_producer(
        listener,
        |n| if n == 1 { None } else { Some(&b"4,6\n"[..]) },
        Arc::clone(&accepts),
    );

    let mut config = base_config("stream", port);
    config["recovery"]["backoff"] = json!({ "min_delay_ms": 100, "max_delay_ms": 10000 });

    // Three failed opens wait 100 + 200 + 400 ms; the producer failure that
    // follows waits the minimum again instead of 800 ms
    let platform = MockPlatform::default();
    platform.state.failing_opens.store(3, Ordering::SeqCst);
    let started = Instant::now();
    let (shutdown, handle) = start(config, &platform);

    wait_until("a published batch", || !platform.state.batches().is_empty()).await;
    let elapsed = started.elapsed();
    let stats = stop(shutdown, handle).await;

    assert!(elapsed < Duration::from_millis(1200), "took {:?}", elapsed);
    assert_eq!(stats.session_failures, 3);
    assert_eq!(stats.source_failures, 1);
    assert_eq!(platform.state.opens(), 5);

    producer.abort();
}

#[tokio::test]
async fn test_failed_publish_drops_reading_and_recovers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicU32::new(0));
    let producer = spawn_producer(
        listener,
        |n| if n == 1 { Some(&b"1,1\n"[..]) } else { Some(&b"2,2\n"[..]) },
        Arc::clone(&accepts),
    );

    let platform = MockPlatform::default();
    platform.state.failing_sends.store(1, Ordering::SeqCst);
    let (shutdown, handle) = start(base_config("stream", port), &platform);

    wait_until("a published batch", || !platform.state.batches().is_empty()).await;
    let stats = stop(shutdown, handle).await;

    // The failed reading is never resent
    let batches = platform.state.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].data.taken, 2);

    assert_eq!(stats.publish_failures, 1);
    assert_eq!(stats.readings, 2);
    assert_eq!(platform.state.opens(), 2);
    assert_eq!(platform.state.closes(), 2);

    producer.abort();
}

#[tokio::test]
async fn test_open_failures_are_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let producer = spawn_producer(listener, |_| Some(&b"3,5\n"[..]), Arc::new(AtomicU32::new(0)));

    let platform = MockPlatform::default();
    platform.state.failing_opens.store(2, Ordering::SeqCst);
    let (shutdown, handle) = start(base_config("stream", port), &platform);

    wait_until("a published batch", || !platform.state.batches().is_empty()).await;
    let stats = stop(shutdown, handle).await;

    assert_eq!(platform.state.opens(), 3);
    assert_eq!(stats.session_failures, 2);
    assert_eq!(stats.session_opens, 1);
    // Failed opens never produced a session to close
    assert_eq!(platform.state.closes(), 1);

    producer.abort();
}

#[tokio::test]
async fn test_shutdown_during_source_backoff() {
    // Nothing listens on this port
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = base_config("stream", port);
    config["source"]["backoff"] = json!({ "min_delay_ms": 1000, "max_delay_ms": 8000 });

    let platform = MockPlatform::default();
    let (shutdown, handle) = start(config, &platform);

    wait_until("the session to open", || platform.state.opens() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let requested_at = Instant::now();
    let stats = stop(shutdown, handle).await;

    assert!(requested_at.elapsed() < Duration::from_millis(500));
    assert_eq!(stats.readings, 0);
    assert_eq!(platform.state.closes(), 1);
}

#[tokio::test]
async fn test_datagram_mode_skips_malformed_messages() {
    let port = {
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap().port()
    };

    let platform = MockPlatform::default();
    let (shutdown, handle) = start(base_config("datagram", port), &platform);

    wait_until("the session to open", || platform.state.opens() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(b"garbage\n", ("127.0.0.1", port)).await.unwrap();
    sender.send_to(b"5,7\n", ("127.0.0.1", port)).await.unwrap();

    wait_until("a published batch", || !platform.state.batches().is_empty()).await;
    let stats = stop(shutdown, handle).await;

    let batches = platform.state.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].data.taken, 5);
    assert_eq!(batches[0][0].data.empty, 7);
    assert_eq!(stats.parse_errors, 1);
    assert_eq!(stats.source_failures, 0);
}

#[tokio::test]
async fn test_shutdown_before_start_publishes_nothing() {
    let platform = MockPlatform::default();
    let config = SparkBridgeConfig::from_json5(&base_config("stream", 50000).to_string()).unwrap();
    let shutdown = ShutdownController::new();
    shutdown.request_shutdown();

    let supervisor = Supervisor::new(&config, platform.clone(), shutdown).unwrap();
    let stats = tokio_test::assert_ok!(
        tokio::time::timeout(Duration::from_secs(1), supervisor.run()).await
    );

    assert_eq!(stats, BridgeStats::default());
    assert_eq!(platform.state.opens(), 0);
}

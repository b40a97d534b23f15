//! End-to-end lifecycle tests against an in-process mock transport.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use reliable_socket::store::{MemoryStore, PendingStore};
use reliable_socket::transport::{Connector, TransportSink, TransportStream};
use reliable_socket::{BlobSource, Phase, ReliableSocket, Result, SocketError, SocketOptions};

/// Event injected into a mock connection's read half.
enum StreamEvent {
    Message(Bytes),
    Error(String),
    Close,
}

/// Handle to one accepted mock connection, for injecting events.
struct Conn {
    tx: UnboundedSender<StreamEvent>,
    open: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockState {
    attempts: AtomicUsize,
    /// Number of initial connection attempts to reject.
    fail_first: usize,
    /// Everything any sink accepted, in send order.
    sent: Mutex<Vec<Bytes>>,
    /// Sink reports closed once this many total sends have landed.
    close_after_sends: Option<usize>,
    conns: Mutex<Vec<Conn>>,
}

impl MockState {
    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    fn last_conn_tx(&self) -> UnboundedSender<StreamEvent> {
        self.conns.lock().unwrap().last().unwrap().tx.clone()
    }
}

struct MockConnector {
    state: Arc<MockState>,
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>)> {
        let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.state.fail_first {
            return Err(SocketError::Transport("connection refused".into()));
        }

        let (tx, rx) = unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        self.state.conns.lock().unwrap().push(Conn {
            tx,
            open: Arc::clone(&open),
        });
        let sink = MockSink {
            state: Arc::clone(&self.state),
            open: Arc::clone(&open),
        };
        let stream = MockStream { rx, open };
        Ok((Box::new(sink), Box::new(stream)))
    }
}

struct MockSink {
    state: Arc<MockState>,
    open: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl TransportSink for MockSink {
    async fn send(&mut self, data: Bytes) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SocketError::Transport("send on closed transport".into()));
        }
        let mut sent = self.state.sent.lock().unwrap();
        sent.push(data);
        if let Some(limit) = self.state.close_after_sends {
            if sent.len() >= limit {
                self.open.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

struct MockStream {
    rx: UnboundedReceiver<StreamEvent>,
    open: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl TransportStream for MockStream {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        match self.rx.recv().await {
            Some(StreamEvent::Message(data)) => Ok(Some(data)),
            Some(StreamEvent::Error(reason)) => {
                self.open.store(false, Ordering::SeqCst);
                Err(SocketError::Transport(reason))
            }
            Some(StreamEvent::Close) | None => {
                self.open.store(false, Ordering::SeqCst);
                Ok(None)
            }
        }
    }
}

/// Opt-in log output for debugging, e.g. RUST_LOG=reliable_socket=debug.
fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn fast_options() -> SocketOptions {
    init_logging();
    SocketOptions {
        use_durable_buffer: false,
        reconnect_interval: Duration::from_millis(20),
        flush_pacing: Duration::from_millis(1),
        ..SocketOptions::default()
    }
}

fn mock_socket(
    state: Arc<MockState>,
    store: Arc<MemoryStore>,
    opts: SocketOptions,
) -> ReliableSocket {
    let connector = Arc::new(MockConnector {
        state: Arc::clone(&state),
    });
    ReliableSocket::with_parts("ws://mock", opts, connector, store)
}

async fn wait_for_phase(socket: &ReliableSocket, phase: Phase) {
    wait_until(|| socket.state() == phase).await;
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timed out waiting for condition");
}

#[tokio::test]
async fn test_buffers_before_connect_and_flushes_in_order() {
    let state = Arc::new(MockState::default());
    let store = Arc::new(MemoryStore::new());
    let socket = mock_socket(Arc::clone(&state), Arc::clone(&store), fast_options());

    socket.send("one").await.unwrap();
    socket.send("two").await.unwrap();
    socket.send("three").await.unwrap();
    assert_eq!(socket.state(), Phase::Closed);
    assert_eq!(store.len(), 3);

    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;
    wait_until(|| state.sent().len() == 3).await;

    assert_eq!(
        state.sent(),
        vec![
            Bytes::from("one"),
            Bytes::from("two"),
            Bytes::from("three")
        ]
    );
    assert!(store.is_empty());

    socket.send("four").await.unwrap();
    wait_until(|| state.sent().len() == 4).await;
    assert!(store.is_empty());

    socket.close().await;
    assert_eq!(socket.state(), Phase::Closed);
}

/// Blob payload whose bytes are produced at send time.
struct CannedBlob(Vec<u8>);

#[async_trait::async_trait]
impl BlobSource for CannedBlob {
    async fn read_to_bytes(self: Box<Self>) -> Result<Bytes> {
        Ok(Bytes::from(self.0))
    }
}

#[tokio::test]
async fn test_every_payload_kind_buffers_one_normalized_entry_before_connect() {
    let state = Arc::new(MockState::default());
    let store = Arc::new(MemoryStore::new());
    let socket = mock_socket(Arc::clone(&state), Arc::clone(&store), fast_options());

    socket.send("héllo").await.unwrap();
    socket.send(Bytes::from_static(&[0, 1, 254, 255])).await.unwrap();
    socket.send(vec![7u8, 8, 9]).await.unwrap();
    let blob: Box<dyn BlobSource> = Box::new(CannedBlob(b"lazy bytes".to_vec()));
    socket.send(blob).await.unwrap();

    assert_eq!(socket.state(), Phase::Closed);
    let entries = store.get_all().await.unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].payload, "héllo".as_bytes());
    assert_eq!(entries[1].payload, &[0, 1, 254, 255]);
    assert_eq!(entries[2].payload, &[7, 8, 9]);
    assert_eq!(entries[3].payload, b"lazy bytes");

    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;
    wait_until(|| store.is_empty()).await;

    assert_eq!(
        state.sent(),
        vec![
            Bytes::from("héllo".as_bytes().to_vec()),
            Bytes::from_static(&[0, 1, 254, 255]),
            Bytes::from_static(&[7, 8, 9]),
            Bytes::from_static(b"lazy bytes"),
        ]
    );

    socket.close().await;
}

#[tokio::test]
async fn test_retries_until_connected_and_suppresses_repeat_errors() {
    let state = Arc::new(MockState {
        fail_first: 3,
        ..MockState::default()
    });
    let errors = Arc::new(AtomicUsize::new(0));
    let mut opts = fast_options();
    let error_count = Arc::clone(&errors);
    opts.on_error = Some(Arc::new(move |_| {
        error_count.fetch_add(1, Ordering::SeqCst);
    }));

    let socket = mock_socket(Arc::clone(&state), Arc::new(MemoryStore::new()), opts);
    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;

    assert_eq!(state.attempts(), 4);
    // Only the first failure surfaces; the rest happen while reconnecting.
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    socket.close().await;
}

#[tokio::test]
async fn test_close_cancels_pending_retry() {
    let state = Arc::new(MockState {
        fail_first: usize::MAX,
        ..MockState::default()
    });
    let socket = mock_socket(Arc::clone(&state), Arc::new(MemoryStore::new()), fast_options());

    socket.connect().await.unwrap();
    wait_until(|| state.attempts() >= 2).await;
    wait_for_phase(&socket, Phase::Reconnecting).await;

    socket.close().await;
    let frozen = state.attempts();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.attempts(), frozen);
    assert_eq!(socket.state(), Phase::Closed);
}

#[tokio::test]
async fn test_unexpected_drop_reconnects_and_fires_callbacks() {
    let state = Arc::new(MockState::default());
    let opens = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));

    let mut opts = fast_options();
    let open_count = Arc::clone(&opens);
    opts.on_open = Some(Arc::new(move || {
        open_count.fetch_add(1, Ordering::SeqCst);
    }));
    let close_count = Arc::clone(&closes);
    opts.on_close = Some(Arc::new(move || {
        close_count.fetch_add(1, Ordering::SeqCst);
    }));

    let socket = mock_socket(Arc::clone(&state), Arc::new(MemoryStore::new()), opts);
    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    state.last_conn_tx().send(StreamEvent::Close).unwrap();
    wait_until(|| opens.load(Ordering::SeqCst) == 2).await;

    assert_eq!(state.attempts(), 2);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(socket.state(), Phase::Open);

    socket.close().await;
}

#[tokio::test]
async fn test_stream_error_surfaces_once_then_reconnects() {
    let state = Arc::new(MockState::default());
    let errors = Arc::new(Mutex::new(Vec::new()));

    let mut opts = fast_options();
    let error_log = Arc::clone(&errors);
    opts.on_error = Some(Arc::new(move |e| {
        error_log.lock().unwrap().push(e.to_string());
    }));

    let socket = mock_socket(Arc::clone(&state), Arc::new(MemoryStore::new()), opts);
    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;

    state
        .last_conn_tx()
        .send(StreamEvent::Error("reset by peer".into()))
        .unwrap();
    wait_until(|| state.attempts() == 2).await;
    wait_for_phase(&socket, Phase::Open).await;

    let logged = errors.lock().unwrap().clone();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("reset by peer"));

    socket.close().await;
}

#[tokio::test]
async fn test_mid_flush_disconnect_still_clears_buffer() {
    let state = Arc::new(MockState {
        close_after_sends: Some(2),
        ..MockState::default()
    });
    let store = Arc::new(MemoryStore::new());
    let socket = mock_socket(Arc::clone(&state), Arc::clone(&store), fast_options());

    for payload in ["a", "b", "c", "d"] {
        socket.send(payload).await.unwrap();
    }
    assert_eq!(store.len(), 4);

    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;

    // The transport died after two sends; the rest are dropped with it.
    assert_eq!(state.sent().len(), 2);
    assert!(store.is_empty());

    socket.close().await;
}

#[tokio::test]
async fn test_inbound_messages_reach_handler_in_order() {
    let state = Arc::new(MockState::default());
    let received = Arc::new(Mutex::new(Vec::new()));

    let mut opts = fast_options();
    let inbox = Arc::clone(&received);
    opts.on_message = Some(Arc::new(move |data| {
        inbox.lock().unwrap().push(data);
    }));

    let socket = mock_socket(Arc::clone(&state), Arc::new(MemoryStore::new()), opts);
    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;

    let tx = state.last_conn_tx();
    tx.send(StreamEvent::Message(Bytes::from("first"))).unwrap();
    tx.send(StreamEvent::Message(Bytes::from("second")))
        .unwrap();
    wait_until(|| received.lock().unwrap().len() == 2).await;

    let inbox = received.lock().unwrap().clone();
    assert_eq!(inbox, vec![Bytes::from("first"), Bytes::from("second")]);

    socket.close().await;
}

#[tokio::test]
async fn test_connect_is_idempotent_while_active() {
    let state = Arc::new(MockState::default());
    let socket = mock_socket(Arc::clone(&state), Arc::new(MemoryStore::new()), fast_options());

    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;
    socket.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(state.attempts(), 1);
    socket.close().await;
}

#[tokio::test]
async fn test_close_then_connect_starts_fresh() {
    let state = Arc::new(MockState::default());
    let store = Arc::new(MemoryStore::new());
    let socket = mock_socket(Arc::clone(&state), Arc::clone(&store), fast_options());

    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;
    socket.close().await;
    assert_eq!(socket.state(), Phase::Closed);

    socket.send("after close").await.unwrap();
    assert_eq!(store.len(), 1);

    socket.connect().await.unwrap();
    wait_for_phase(&socket, Phase::Open).await;
    wait_until(|| store.is_empty()).await;

    assert_eq!(state.attempts(), 2);
    assert_eq!(state.sent().last().unwrap(), &Bytes::from("after close"));

    socket.close().await;
}

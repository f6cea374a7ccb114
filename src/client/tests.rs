use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, Semaphore};

use super::*;
use crate::actor::CallerInbox;
use crate::error::{ProtocolError, TransportError};
use crate::protocol::Reply;
use crate::transport::ReplyStream;

/// Transport double that records every request and lets the test drive
/// replies. Session construction blocks until the gate has permits, and
/// outbound requests are only read while `reading` has permits.
struct FakeTransport {
    gate: Semaphore,
    reading: Arc<Semaphore>,
    opened: AtomicUsize,
    requests: Arc<Mutex<Vec<Request>>>,
    closed_outbound: Arc<AtomicUsize>,
    reply_senders: Mutex<Vec<mpsc::Sender<Result<Reply, TransportError>>>>,
    ask_delay: Option<Duration>,
}

impl FakeTransport {
    fn open() -> Arc<Self> {
        Self::build(Semaphore::MAX_PERMITS, Semaphore::MAX_PERMITS, None)
    }

    fn gated() -> Arc<Self> {
        Self::build(0, Semaphore::MAX_PERMITS, None)
    }

    /// Sessions open at once but nothing is read until `resume_reading`
    fn stalled() -> Arc<Self> {
        Self::build(Semaphore::MAX_PERMITS, 0, None)
    }

    fn slow_ask(delay: Duration) -> Arc<Self> {
        Self::build(Semaphore::MAX_PERMITS, Semaphore::MAX_PERMITS, Some(delay))
    }

    fn build(permits: usize, read_permits: usize, ask_delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(permits),
            reading: Arc::new(Semaphore::new(read_permits)),
            opened: AtomicUsize::new(0),
            requests: Arc::new(Mutex::new(Vec::new())),
            closed_outbound: Arc::new(AtomicUsize::new(0)),
            reply_senders: Mutex::new(Vec::new()),
            ask_delay,
        })
    }

    fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS >> 4);
    }

    fn resume_reading(&self) {
        self.reading.add_permits(Semaphore::MAX_PERMITS >> 4);
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn texts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|request| String::from_utf8(request.payload().bytes.clone()).unwrap())
            .collect()
    }

    fn reply_sender(&self, index: usize) -> mpsc::Sender<Result<Reply, TransportError>> {
        self.reply_senders.lock()[index].clone()
    }

    fn end_sessions(&self) {
        self.reply_senders.lock().clear();
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open_session(
        &self,
        mut outbound: mpsc::Receiver<Request>,
    ) -> Result<ReplyStream, TransportError> {
        self.gate
            .acquire()
            .await
            .map_err(|_| TransportError::Closed)?
            .forget();
        self.opened.fetch_add(1, Ordering::SeqCst);

        let requests = self.requests.clone();
        let closed = self.closed_outbound.clone();
        let reading = self.reading.clone();
        tokio::spawn(async move {
            loop {
                match reading.acquire().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => break,
                }
                match outbound.recv().await {
                    Some(request) => requests.lock().push(request),
                    None => break,
                }
            }
            closed.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, rx) = mpsc::channel(16);
        self.reply_senders.lock().push(tx);
        Ok(rx)
    }

    async fn ask_send(&self, request: SendRequest) -> Result<Reply, GatewayError> {
        if let Some(delay) = self.ask_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Reply {
            payload: request.payload,
        })
    }
}

fn client_with(transport: Arc<FakeTransport>, buffer_size: usize) -> GatewayClient {
    let settings = ClientSettings {
        buffer_size,
        ask_timeout: Duration::from_millis(200),
    };
    GatewayClient::spawn(
        settings,
        transport,
        Arc::new(CodecRegistry::with_defaults()),
        None,
    )
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never met: {}", what);
}

async fn eventually_sessions(client: &GatewayClient, expected: usize) {
    for _ in 0..200 {
        if client.session_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session count never reached {}", expected);
}

async fn recv_text(inbox: &mut CallerInbox) -> String {
    let message = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
        .await
        .expect("reply timed out")
        .expect("caller inbox closed");
    message.downcast_ref::<String>().unwrap().clone()
}

#[tokio::test]
async fn test_concurrent_first_use_builds_one_session() {
    let transport = FakeTransport::gated();
    let client = client_with(transport.clone(), 16);
    let (caller, _inbox) = CallerRef::new();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        let caller = caller.clone();
        tasks.push(tokio::spawn(async move {
            client.send(&caller, "/user/svc", format!("msg-{}", i), false);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(client.session_count().await, 1);

    transport.release();
    eventually("all requests forwarded", || transport.texts().len() == 8).await;
    assert_eq!(transport.opened(), 1);
}

#[tokio::test]
async fn test_requests_keep_enqueue_order() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);
    let (caller, _inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "first", true);
    client.send(&caller, "/user/svc", "second", true);

    eventually("both requests forwarded", || transport.texts().len() == 2).await;
    assert_eq!(transport.texts(), vec!["first", "second"]);
    assert_eq!(transport.opened(), 1);

    let requests = transport.requests.lock().clone();
    assert!(matches!(
        &requests[0],
        Request::Send { path, prefer_local: true, .. } if path == "/user/svc"
    ));
}

#[tokio::test]
async fn test_request_variants() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);
    let (caller, _inbox) = CallerRef::new();

    client.send_to_all(&caller, "/user/all", "a");
    client.publish(&caller, "news", "b");

    eventually("both requests forwarded", || transport.texts().len() == 2).await;
    let kinds: Vec<&str> = transport
        .requests
        .lock()
        .iter()
        .map(|request| request.kind())
        .collect();
    assert_eq!(kinds, vec!["send_to_all", "publish"]);
}

#[tokio::test]
async fn test_buffer_of_one_keeps_latest() {
    let transport = FakeTransport::gated();
    let client = client_with(transport.clone(), 1);
    let (caller, _inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "a", false);
    client.send(&caller, "/user/svc", "b", false);
    // Both commands are in the registry's hands before the session exists
    assert_eq!(client.session_count().await, 1);

    transport.release();
    eventually("one request forwarded", || transport.texts().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.texts(), vec!["b"]);
}

#[tokio::test]
async fn test_stalled_transport_keeps_latest() {
    let transport = FakeTransport::stalled();
    let client = client_with(transport.clone(), 1);
    let (caller, _inbox) = CallerRef::new();

    // Takes the single slot the transport offers
    client.send(&caller, "/user/svc", "warmup", false);
    eventually("session opened", || transport.opened() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    for text in ["a", "b", "c", "d"] {
        client.send(&caller, "/user/svc", text, false);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    transport.resume_reading();
    eventually("requests forwarded", || transport.texts().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.texts(), vec!["warmup", "d"]);
}

#[tokio::test]
async fn test_zero_buffer_drops_while_pipeline_not_waiting() {
    let transport = FakeTransport::gated();
    let client = client_with(transport.clone(), 0);
    let (caller, _inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "early", false);
    assert_eq!(client.session_count().await, 1);
    transport.release();
    eventually("session opened", || transport.opened() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(transport.texts().is_empty());

    client.send(&caller, "/user/svc", "late", false);
    eventually("late request forwarded", || transport.texts() == vec!["late"]).await;
}

#[tokio::test]
async fn test_replies_reach_caller() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);
    let (caller, mut inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "ping", false);
    eventually("session opened", || transport.opened() == 1).await;

    let codec = CodecRegistry::with_defaults();
    let replies = transport.reply_sender(0);
    for text in ["one", "two"] {
        let payload = codec.encode(&Message::from(text)).unwrap();
        replies.send(Ok(Reply { payload })).await.unwrap();
    }

    assert_eq!(recv_text(&mut inbox).await, "one");
    assert_eq!(recv_text(&mut inbox).await, "two");
}

#[tokio::test]
async fn test_caller_termination_tears_down_session() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);
    let (caller, mut inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "ping", false);
    eventually("request forwarded", || transport.texts().len() == 1).await;
    assert_eq!(client.session_count().await, 1);

    inbox.stop();
    eventually_sessions(&client, 0).await;
    eventually("outbound closed", || {
        transport.closed_outbound.load(Ordering::SeqCst) == 1
    })
    .await;

    // Commands from a terminated caller are not delivered anywhere
    client.send(&caller, "/user/svc", "late", false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.session_count().await, 0);
    assert_eq!(transport.opened(), 1);
    assert_eq!(transport.texts(), vec!["ping"]);
}

#[tokio::test]
async fn test_caller_terminated_before_session_opens() {
    let transport = FakeTransport::gated();
    let client = client_with(transport.clone(), 16);
    let (caller, inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "ping", false);
    assert_eq!(client.session_count().await, 1);

    drop(inbox);
    eventually_sessions(&client, 0).await;
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn test_ended_session_is_reacquired() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);
    let (caller, _inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "one", false);
    eventually("first request forwarded", || transport.texts().len() == 1).await;

    // Receptionist completes the session
    transport.end_sessions();
    eventually_sessions(&client, 0).await;

    client.send(&caller, "/user/svc", "two", false);
    eventually("second request forwarded", || transport.texts().len() == 2).await;
    assert_eq!(transport.opened(), 2);
}

#[tokio::test]
async fn test_remote_gone_ends_session() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);
    let (caller, _inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "one", false);
    eventually("first request forwarded", || transport.texts().len() == 1).await;

    let reset = TransportError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
    assert!(reset.is_remote_gone());
    transport
        .reply_sender(0)
        .send(Err(reset))
        .await
        .unwrap();
    eventually_sessions(&client, 0).await;
    eventually("outbound closed", || {
        transport.closed_outbound.load(Ordering::SeqCst) == 1
    })
    .await;

    client.send(&caller, "/user/svc", "two", false);
    eventually("second request forwarded", || transport.texts().len() == 2).await;
    assert_eq!(transport.opened(), 2);
}

#[tokio::test]
async fn test_transport_failure_releases_session() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);
    let (caller, mut inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "one", false);
    eventually("first request forwarded", || transport.texts().len() == 1).await;

    let failure = TransportError::Protocol(ProtocolError::Malformed("bad frame".to_string()));
    assert!(!failure.is_remote_gone());
    transport.reply_sender(0).send(Err(failure)).await.unwrap();
    eventually_sessions(&client, 0).await;

    // The next command opens a fresh session that works normally
    client.send(&caller, "/user/svc", "two", false);
    eventually("second session opened", || transport.opened() == 2).await;
    eventually("second request forwarded", || transport.texts().len() == 2).await;

    let payload = CodecRegistry::with_defaults()
        .encode(&Message::from("after"))
        .unwrap();
    transport
        .reply_sender(1)
        .send(Ok(Reply { payload }))
        .await
        .unwrap();
    assert_eq!(recv_text(&mut inbox).await, "after");
}

#[tokio::test]
async fn test_sessions_are_per_caller() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);
    let (first, _first_inbox) = CallerRef::new();
    let (second, _second_inbox) = CallerRef::new();

    client.send(&first, "/user/svc", "a", false);
    client.send(&second, "/user/svc", "b", false);

    eventually("both requests forwarded", || transport.texts().len() == 2).await;
    assert_eq!(transport.opened(), 2);
    assert_eq!(client.session_count().await, 2);
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_closes_sessions() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);
    let (caller, _inbox) = CallerRef::new();

    client.send(&caller, "/user/svc", "ping", false);
    eventually("request forwarded", || transport.texts().len() == 1).await;

    assert!(client.shutdown());
    assert!(!client.shutdown());
    eventually("outbound closed", || {
        transport.closed_outbound.load(Ordering::SeqCst) == 1
    })
    .await;

    client.send(&caller, "/user/svc", "after", false);
    assert_eq!(client.session_count().await, 0);
    assert!(matches!(
        client.send_ask("/user/svc", "x", false).await,
        Err(GatewayError::Shutdown)
    ));
}

#[tokio::test]
async fn test_send_ask_round_trip() {
    let transport = FakeTransport::open();
    let client = client_with(transport.clone(), 16);

    let reply = client.send_ask("/user/echo", "hello", false).await.unwrap();
    assert_eq!(reply.downcast_ref::<String>().unwrap(), "hello");
    // The ask path never creates a session
    assert_eq!(client.session_count().await, 0);
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn test_send_ask_times_out() {
    let transport = FakeTransport::slow_ask(Duration::from_secs(5));
    let client = client_with(transport, 16);

    let result = client.send_ask("/user/echo", "hello", false).await;
    assert!(matches!(result, Err(GatewayError::Timeout)));
}

#[tokio::test]
async fn test_send_ask_unencodable_message() {
    #[derive(Debug)]
    struct Unregistered;

    let client = client_with(FakeTransport::open(), 16);
    let result = client
        .send_ask("/user/echo", Message::new(Unregistered), false)
        .await;
    assert!(matches!(
        result,
        Err(GatewayError::Encode(EncodeError::NoSerializer(_)))
    ));
}

//! Gateway Server (Receptionist)
//!
//! Cluster side of the gateway. Accepts sessions, decodes each inbound
//! request, hands it to the dispatch mediator with the session's reply sink
//! as reply target, and streams the encoded replies back. Also serves the
//! one-shot ask path and the service registration API.
//!
//! The server keeps no per-session state beyond the id used for logging.

mod listener;


use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::actor::{ActorRef, AskReply, ReplySink, ReplyTo};
use crate::codec::{CodecRegistry, Message};
use crate::config::ReceptionistConfig;
use crate::error::{GatewayError, ProtocolError, RegistrationError};
use crate::mediator::DispatchMediator;
use crate::metrics::{GatewayMetrics, SIDE_SERVER};
use crate::protocol::{Reply, Request, SendRequest};
use crate::session::{CancellationScope, Offer, OverflowQueue, SessionId};

/// Receptionist settings fixed at construction
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    /// Replies buffered per session
    pub buffer_size: usize,
    pub ask_send_timeout: Duration,
    pub max_frame_size: usize,
}

impl From<&ReceptionistConfig> for ServerSettings {
    fn from(config: &ReceptionistConfig) -> Self {
        Self {
            bind_addr: config.bind,
            buffer_size: config.buffer_size,
            ask_send_timeout: config.ask_send_timeout,
            max_frame_size: config.max_frame_size,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from(&ReceptionistConfig::default())
    }
}

/// A session accepted by the receptionist
pub struct ServerSession {
    pub id: SessionId,
    /// Encoded replies; completes when the session ends
    pub replies: mpsc::Receiver<Reply>,
}

struct ServerInner {
    settings: ServerSettings,
    mediator: Arc<dyn DispatchMediator>,
    codec: Arc<CodecRegistry>,
    scope: CancellationScope,
    metrics: Option<Arc<GatewayMetrics>>,
}

/// Cluster-side gateway; clone freely
#[derive(Clone)]
pub struct GatewayServer {
    inner: Arc<ServerInner>,
}

/// Reply target handed to the mediator for every request of a session
struct SessionReplySink {
    session_id: SessionId,
    queue: Arc<OverflowQueue<Message>>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl ReplySink for SessionReplySink {
    fn deliver(&self, message: Message) -> bool {
        let offer = self.queue.offer(message);
        match offer {
            Offer::Enqueued => {}
            Offer::DroppedOldest | Offer::Dropped => {
                debug!(
                    "Session [{}]: reply buffer full, dropped a reply",
                    self.session_id
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.message_dropped(SIDE_SERVER);
                }
            }
            Offer::Closed => {
                debug!("Session [{}]: reply after session end dropped", self.session_id);
            }
        }
        offer != Offer::Closed
    }
}

impl GatewayServer {
    pub fn new(
        settings: ServerSettings,
        mediator: Arc<dyn DispatchMediator>,
        codec: Arc<CodecRegistry>,
        metrics: Option<Arc<GatewayMetrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                settings,
                mediator,
                codec,
                scope: CancellationScope::new("receptionist"),
                metrics,
            }),
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.inner.settings
    }

    pub fn scope(&self) -> &CancellationScope {
        &self.inner.scope
    }

    pub fn codec(&self) -> &Arc<CodecRegistry> {
        &self.inner.codec
    }

    /// Accept a session fed by `inbound`.
    ///
    /// The returned reply stream completes once `inbound` ends or fails, or
    /// when the server is shut down.
    pub fn open_session<S>(&self, inbound: S) -> ServerSession
    where
        S: Stream<Item = Result<Request, ProtocolError>> + Send + Unpin + 'static,
    {
        let id = SessionId::generate();
        info!("New session [{}]", id);
        if let Some(ref metrics) = self.inner.metrics {
            metrics.session_opened(SIDE_SERVER);
        }

        let queue = Arc::new(OverflowQueue::new(self.inner.settings.buffer_size));
        let reply_to = ReplyTo::new(Arc::new(SessionReplySink {
            session_id: id.clone(),
            queue: queue.clone(),
            metrics: self.inner.metrics.clone(),
        }));

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(forward_replies(
            self.clone(),
            id.clone(),
            queue.clone(),
            tx,
        ));
        tokio::spawn(self.clone().run_inbound(id.clone(), inbound, reply_to, queue));

        ServerSession { id, replies: rx }
    }

    async fn run_inbound<S>(
        self,
        id: SessionId,
        mut inbound: S,
        reply_to: ReplyTo,
        replies: Arc<OverflowQueue<Message>>,
    ) where
        S: Stream<Item = Result<Request, ProtocolError>> + Send + Unpin + 'static,
    {
        let scope = self.inner.scope.clone();
        let mut dispatched = 0u64;

        let outcome = loop {
            let item = tokio::select! {
                biased;
                _ = scope.cancelled() => {
                    debug!("Session [{}]: receptionist shutting down", id);
                    break Ok(());
                }
                item = inbound.next() => item,
            };

            match item {
                Some(Ok(request)) => {
                    self.dispatch(&id, request, &reply_to);
                    dispatched += 1;
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            }
        };

        replies.close();
        if let Some(ref metrics) = self.inner.metrics {
            metrics.session_closed(SIDE_SERVER);
        }

        match outcome {
            Ok(()) => info!(
                "Session [{}] completed successfully after {} requests",
                id, dispatched
            ),
            Err(e) => info!("Session [{}] completed with failure: {}", id, e),
        }
    }

    fn dispatch(&self, id: &SessionId, request: Request, reply_to: &ReplyTo) {
        let kind = request.kind();
        let message = match self.inner.codec.decode(request.payload()) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Session [{}]: dropping {} to '{}': {}",
                    id,
                    kind,
                    request.destination(),
                    e
                );
                if let Some(ref metrics) = self.inner.metrics {
                    metrics.decode_failed(SIDE_SERVER);
                }
                return;
            }
        };

        let mediator = &self.inner.mediator;
        let delivered = match request {
            Request::Send {
                path, prefer_local, ..
            } => mediator.send(&path, message, reply_to.clone(), prefer_local),
            Request::SendToAll { path, .. } => mediator.send_to_all(&path, message, reply_to.clone()),
            Request::Publish { topic, .. } => mediator.publish(&topic, message, reply_to.clone()),
        };

        debug!("Session [{}]: {} delivered to {} actors", id, kind, delivered);
        if let Some(ref metrics) = self.inner.metrics {
            metrics.request(SIDE_SERVER, kind);
        }
    }

    /// One-shot request: dispatch a `Send` and wait for the first reply
    pub async fn ask_send(&self, request: SendRequest) -> Result<Reply, GatewayError> {
        let metrics = self.inner.metrics.as_deref();
        if let Some(metrics) = metrics {
            metrics.ask_started(SIDE_SERVER);
        }
        if self.inner.scope.is_shutdown() {
            return Err(GatewayError::Shutdown);
        }

        let message = self.inner.codec.decode(&request.payload).map_err(|e| {
            warn!("Ask to '{}' rejected: {}", request.path, e);
            if let Some(metrics) = metrics {
                metrics.decode_failed(SIDE_SERVER);
            }
            e
        })?;

        let (reply_to, rx) = AskReply::channel();
        let started = Instant::now();
        self.inner
            .mediator
            .send(&request.path, message, reply_to, request.prefer_local);

        let reply = match tokio::time::timeout(self.inner.settings.ask_send_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                debug!("Ask to '{}': reply target dropped without reply", request.path);
                if let Some(metrics) = metrics {
                    metrics.ask_timed_out(SIDE_SERVER);
                }
                return Err(GatewayError::Timeout);
            }
            Err(_) => {
                debug!(
                    "Ask to '{}' timed out after {:?}",
                    request.path, self.inner.settings.ask_send_timeout
                );
                if let Some(metrics) = metrics {
                    metrics.ask_timed_out(SIDE_SERVER);
                }
                return Err(GatewayError::Timeout);
            }
        };
        if let Some(metrics) = metrics {
            metrics.ask_completed(started.elapsed().as_secs_f64());
        }

        let payload = self.inner.codec.encode(&reply).map_err(|e| {
            warn!("Ask to '{}': reply not encodable: {}", request.path, e);
            if let Some(metrics) = metrics {
                metrics.encode_failed(SIDE_SERVER);
            }
            e
        })?;
        Ok(Reply { payload })
    }

    /// Make `actor` reachable at its own path
    pub fn register_service(&self, actor: ActorRef) -> Result<(), RegistrationError> {
        let path = actor.path().to_string();
        self.inner.mediator.register(&path, actor)
    }

    pub fn unregister_service(&self, actor: &ActorRef) {
        self.inner.mediator.unregister(actor);
    }

    pub fn register_subscriber(&self, topic: &str, actor: ActorRef) -> Result<(), RegistrationError> {
        self.inner.mediator.subscribe(topic, actor)
    }

    pub fn unregister_subscriber(&self, topic: &str, actor: &ActorRef) {
        self.inner.mediator.unsubscribe(topic, actor);
    }

    /// Stop accepting connections and end every session. Idempotent.
    pub fn shutdown(&self) -> bool {
        self.inner.scope.shutdown()
    }
}

/// Encode buffered replies onto the session's reply stream
async fn forward_replies(
    server: GatewayServer,
    id: SessionId,
    queue: Arc<OverflowQueue<Message>>,
    tx: mpsc::Sender<Reply>,
) {
    let scope = server.inner.scope.clone();
    let metrics = server.inner.metrics.clone();

    loop {
        // Reserve before popping so a slow reader never pins an old reply
        let permit = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("Session [{}]: reply stream dropped", id);
                    break;
                }
            },
        };
        let message = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            message = queue.pop() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match server.inner.codec.encode(&message) {
            Ok(payload) => {
                permit.send(Reply { payload });
                if let Some(ref metrics) = metrics {
                    metrics.reply(SIDE_SERVER);
                }
            }
            Err(e) => {
                warn!("Session [{}]: dropping reply: {}", id, e);
                if let Some(ref metrics) = metrics {
                    metrics.encode_failed(SIDE_SERVER);
                }
            }
        }
    }

    queue.close();
}

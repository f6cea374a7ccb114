//! Client session pipeline
//!
//! Opens the duplex stream for one caller, pumps buffered commands out as
//! requests in order, and hands decoded replies to the caller. Ends when the
//! caller terminates, the stream completes or fails, or the client shuts down.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::actor::CallerRef;
use crate::codec::CodecRegistry;
use crate::error::TransportError;
use crate::metrics::{GatewayMetrics, SIDE_CLIENT};
use crate::protocol::Request;
use crate::session::{CancellationScope, OverflowQueue, SessionHandle, SessionId};
use crate::transport::Transport;

use super::registry::SessionEvent;
use super::SessionCommand;

/// Everything a pipeline needs from its client
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) codec: Arc<CodecRegistry>,
    pub(crate) scope: CancellationScope,
    pub(crate) events: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) metrics: Option<Arc<GatewayMetrics>>,
}

enum SessionEnd {
    /// Receptionist closed the stream
    Completed,
    CallerTerminated,
    /// Client scope shut down
    Cancelled,
    Failed(TransportError),
}

pub(crate) async fn run_session(
    caller: CallerRef,
    handle: SessionHandle<SessionCommand>,
    ctx: SessionContext,
) {
    let id = handle.id().clone();
    let queue = handle.queue();
    info!("New session [{}] for {}", id, caller.id());

    let cancelled = ctx.scope.cancelled();
    tokio::pin!(cancelled);
    let terminated = caller.terminated();
    tokio::pin!(terminated);

    let (request_tx, request_rx) = mpsc::channel::<Request>(1);
    let opened = tokio::select! {
        biased;
        _ = &mut cancelled => Err(SessionEnd::Cancelled),
        _ = &mut terminated => Err(SessionEnd::CallerTerminated),
        opened = ctx.transport.open_session(request_rx) => opened.map_err(SessionEnd::Failed),
    };

    let end = match opened {
        Ok(mut replies) => {
            if let Some(ref metrics) = ctx.metrics {
                metrics.session_opened(SIDE_CLIENT);
            }

            let pump = pump_requests(&id, &queue, &ctx, request_tx);
            tokio::pin!(pump);
            let mut pump_done = false;

            let end = loop {
                tokio::select! {
                    biased;
                    _ = &mut cancelled => break SessionEnd::Cancelled,
                    _ = &mut terminated => break SessionEnd::CallerTerminated,
                    _ = &mut pump, if !pump_done => pump_done = true,
                    reply = replies.recv() => match reply {
                        Some(Ok(reply)) => match ctx.codec.decode(&reply.payload) {
                            Ok(message) => {
                                if !caller.tell(message) {
                                    break SessionEnd::CallerTerminated;
                                }
                                if let Some(ref metrics) = ctx.metrics {
                                    metrics.reply(SIDE_CLIENT);
                                }
                            }
                            Err(e) => {
                                warn!("Session [{}]: dropping reply for {}: {}", id, caller.id(), e);
                                if let Some(ref metrics) = ctx.metrics {
                                    metrics.decode_failed(SIDE_CLIENT);
                                }
                            }
                        },
                        Some(Err(e)) if e.is_remote_gone() => break SessionEnd::Completed,
                        Some(Err(e)) => break SessionEnd::Failed(e),
                        None => break SessionEnd::Completed,
                    },
                }
            };

            if let Some(ref metrics) = ctx.metrics {
                metrics.session_closed(SIDE_CLIENT);
            }
            if matches!(end, SessionEnd::CallerTerminated) {
                release_caller(&ctx, &caller, &id).await;
            }
            // Dropping `pump` releases the request sender, which closes the
            // outbound side of the transport
            end
        }
        Err(SessionEnd::CallerTerminated) => {
            release_caller(&ctx, &caller, &id).await;
            SessionEnd::CallerTerminated
        }
        Err(end) => end,
    };

    match end {
        SessionEnd::CallerTerminated => {
            queue.close();
            info!("Session [{}] completed successfully for {}", id, caller.id());
        }
        SessionEnd::Completed | SessionEnd::Cancelled => {
            queue.close();
            let _ = ctx.events.send(SessionEvent::Ended {
                caller_id: caller.id(),
                session_id: id.clone(),
            });
            info!("Session [{}] completed successfully for {}", id, caller.id());
        }
        SessionEnd::Failed(e) => {
            queue.close();
            let _ = ctx.events.send(SessionEvent::Ended {
                caller_id: caller.id(),
                session_id: id.clone(),
            });
            info!(
                "Session [{}] completed with failure for {}: {}",
                id,
                caller.id(),
                e
            );
        }
    }
}

/// Have the registry drop the caller's entry before anything is released
async fn release_caller(ctx: &SessionContext, caller: &CallerRef, id: &SessionId) {
    let (ack, acked) = oneshot::channel();
    let event = SessionEvent::CallerTerminated {
        caller_id: caller.id(),
        session_id: id.clone(),
        ack,
    };
    if ctx.events.send(event).is_ok() {
        let _ = acked.await;
    }
}

/// Encode queued commands onto the transport, in order.
///
/// A slot on the transport is reserved before a command leaves the queue,
/// so a stalled transport holds at most one request and everything newer
/// stays subject to the queue's drop-oldest policy.
async fn pump_requests(
    id: &SessionId,
    queue: &OverflowQueue<SessionCommand>,
    ctx: &SessionContext,
    requests: mpsc::Sender<Request>,
) {
    loop {
        let permit = match requests.reserve().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Session [{}]: transport stopped taking requests", id);
                return;
            }
        };
        let command = match queue.pop().await {
            Some(command) => command,
            None => return,
        };

        let kind = command.kind();
        match command.into_request(&ctx.codec) {
            Ok(request) => {
                permit.send(request);
                if let Some(ref metrics) = ctx.metrics {
                    metrics.request(SIDE_CLIENT, kind);
                }
            }
            Err(e) => {
                warn!("Session [{}]: dropping {}: {}", id, kind, e);
                if let Some(ref metrics) = ctx.metrics {
                    metrics.encode_failed(SIDE_CLIENT);
                }
            }
        }
    }
}

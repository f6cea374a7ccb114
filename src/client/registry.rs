//! Session registry
//!
//! The command loop is the only owner of the caller -> session map. Public
//! calls and session pipelines talk to it through channels, so the map needs
//! no lock. A handle is installed before its session is constructed, which
//! gives every caller at most one session no matter how many commands race.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::actor::{CallerId, CallerRef};
use crate::codec::CodecRegistry;
use crate::metrics::{GatewayMetrics, SIDE_CLIENT};
use crate::session::{CancellationScope, Offer, SessionHandle, SessionId};
use crate::transport::Transport;

use super::session::{run_session, SessionContext};
use super::SessionCommand;

/// Requests from public handles
pub(crate) enum ClientCommand {
    Stream {
        caller: CallerRef,
        command: SessionCommand,
    },
    SessionCount(oneshot::Sender<usize>),
}

/// Notifications from session pipelines
pub(crate) enum SessionEvent {
    /// The session finished for a reason other than caller termination
    Ended {
        caller_id: CallerId,
        session_id: SessionId,
    },
    /// The caller is gone; acknowledged once its entry is removed
    CallerTerminated {
        caller_id: CallerId,
        session_id: SessionId,
        ack: oneshot::Sender<()>,
    },
}

pub(crate) struct CommandLoop {
    sessions: HashMap<CallerId, SessionHandle<SessionCommand>>,
    buffer_size: usize,
    context: SessionContext,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl CommandLoop {
    pub(crate) fn new(
        buffer_size: usize,
        transport: Arc<dyn Transport>,
        codec: Arc<CodecRegistry>,
        scope: CancellationScope,
        metrics: Option<Arc<GatewayMetrics>>,
    ) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        Self {
            sessions: HashMap::new(),
            buffer_size,
            context: SessionContext {
                transport,
                codec,
                scope,
                events,
                metrics,
            },
            events_rx,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ClientCommand>) {
        let scope = self.context.scope.clone();

        loop {
            tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All client handles dropped");
                        scope.shutdown();
                        break;
                    }
                },
            }
        }

        for handle in self.sessions.values() {
            handle.close();
        }
        info!(
            "Client command loop stopped, closed {} sessions",
            self.sessions.len()
        );
        self.sessions.clear();
    }

    fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Stream { caller, command } => self.enqueue(caller, command),
            ClientCommand::SessionCount(reply) => {
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    fn enqueue(&mut self, caller: CallerRef, command: SessionCommand) {
        if caller.is_terminated() {
            debug!("Dropping {} from terminated {}", command.kind(), caller.id());
            return;
        }

        let handle = match self.sessions.get(&caller.id()) {
            Some(handle) if !handle.is_closed() => handle.clone(),
            _ => self.acquire(&caller),
        };

        match handle.enqueue(command) {
            Offer::Enqueued => {}
            Offer::DroppedOldest | Offer::Dropped => {
                debug!(
                    "Session [{}]: buffer full, dropped a command for {}",
                    handle.id(),
                    caller.id()
                );
                if let Some(ref metrics) = self.context.metrics {
                    metrics.message_dropped(SIDE_CLIENT);
                }
            }
            Offer::Closed => {
                debug!("Session [{}]: closed, dropped a command", handle.id());
            }
        }
    }

    /// Install a pending session for `caller` and start building it
    fn acquire(&mut self, caller: &CallerRef) -> SessionHandle<SessionCommand> {
        let handle = SessionHandle::new(SessionId::generate(), self.buffer_size);
        if let Some(stale) = self.sessions.insert(caller.id(), handle.clone()) {
            debug!("Session [{}] for {} replaced", stale.id(), caller.id());
        }
        tokio::spawn(run_session(
            caller.clone(),
            handle.clone(),
            self.context.clone(),
        ));
        handle
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Ended {
                caller_id,
                session_id,
            } => {
                self.remove(caller_id, &session_id);
            }
            SessionEvent::CallerTerminated {
                caller_id,
                session_id,
                ack,
            } => {
                self.remove(caller_id, &session_id);
                let _ = ack.send(());
            }
        }
    }

    /// Remove the entry only if it still belongs to `session_id`
    fn remove(&mut self, caller_id: CallerId, session_id: &SessionId) {
        let current = self
            .sessions
            .get(&caller_id)
            .is_some_and(|handle| handle.id() == session_id);
        if current {
            self.sessions.remove(&caller_id);
            debug!("Session [{}] for {} removed", session_id, caller_id);
        }
    }
}

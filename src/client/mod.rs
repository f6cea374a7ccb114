//! Gateway Client
//!
//! External side of the gateway. Callers hand commands to a clonable
//! [`GatewayClient`]; a single command loop owns the session registry and
//! lazily opens one session per caller on first use. Replies flow back to the
//! caller's inbox until the caller terminates.
//!
//! `send_ask` bypasses sessions entirely and performs a single round trip.

mod registry;
mod session;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::actor::CallerRef;
use crate::codec::{CodecRegistry, EncodeError, Message};
use crate::config::ClientConfig;
use crate::error::GatewayError;
use crate::metrics::{GatewayMetrics, SIDE_CLIENT};
use crate::protocol::{Request, SendRequest};
use crate::session::CancellationScope;
use crate::transport::{TcpTransport, Transport};

use registry::{ClientCommand, CommandLoop};

/// Client settings fixed at construction
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Commands buffered per caller; 0 disables buffering
    pub buffer_size: usize,
    pub ask_timeout: Duration,
}

impl From<&ClientConfig> for ClientSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            ask_timeout: config.ask_timeout,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// A streaming command waiting in a caller's session buffer
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Send {
        path: String,
        message: Message,
        prefer_local: bool,
    },
    SendToAll {
        path: String,
        message: Message,
    },
    Publish {
        topic: String,
        message: Message,
    },
}

impl SessionCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionCommand::Send { .. } => "send",
            SessionCommand::SendToAll { .. } => "send_to_all",
            SessionCommand::Publish { .. } => "publish",
        }
    }

    /// Encode the message and build the wire request
    pub fn into_request(self, codec: &CodecRegistry) -> Result<Request, EncodeError> {
        Ok(match self {
            SessionCommand::Send {
                path,
                message,
                prefer_local,
            } => Request::Send {
                path,
                payload: codec.encode(&message)?,
                prefer_local,
            },
            SessionCommand::SendToAll { path, message } => Request::SendToAll {
                path,
                payload: codec.encode(&message)?,
            },
            SessionCommand::Publish { topic, message } => Request::Publish {
                topic,
                payload: codec.encode(&message)?,
            },
        })
    }
}

struct ClientInner {
    commands: mpsc::UnboundedSender<ClientCommand>,
    transport: Arc<dyn Transport>,
    codec: Arc<CodecRegistry>,
    settings: ClientSettings,
    scope: CancellationScope,
    metrics: Option<Arc<GatewayMetrics>>,
}

/// Handle to a running gateway client; clone freely.
///
/// Dropping the last handle shuts the client down.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl GatewayClient {
    /// Start the command loop on the current runtime
    pub fn spawn(
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
        codec: Arc<CodecRegistry>,
        metrics: Option<Arc<GatewayMetrics>>,
    ) -> Self {
        let scope = CancellationScope::new("gateway-client");
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let command_loop = CommandLoop::new(
            settings.buffer_size,
            transport.clone(),
            codec.clone(),
            scope.clone(),
            metrics.clone(),
        );
        tokio::spawn(command_loop.run(commands_rx));

        Self {
            inner: Arc::new(ClientInner {
                commands,
                transport,
                codec,
                settings,
                scope,
                metrics,
            }),
        }
    }

    /// Client talking TCP to the configured receptionist
    pub fn connect(
        config: &ClientConfig,
        codec: Arc<CodecRegistry>,
        metrics: Option<Arc<GatewayMetrics>>,
    ) -> Self {
        Self::spawn(
            ClientSettings::from(config),
            Arc::new(TcpTransport::from_config(config)),
            codec,
            metrics,
        )
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    pub fn scope(&self) -> &CancellationScope {
        &self.inner.scope
    }

    /// Deliver `message` to one actor at `path`; replies go to `caller`
    pub fn send(
        &self,
        caller: &CallerRef,
        path: impl Into<String>,
        message: impl Into<Message>,
        prefer_local: bool,
    ) {
        self.stream(
            caller,
            SessionCommand::Send {
                path: path.into(),
                message: message.into(),
                prefer_local,
            },
        );
    }

    /// Deliver `message` to every actor at `path`
    pub fn send_to_all(&self, caller: &CallerRef, path: impl Into<String>, message: impl Into<Message>) {
        self.stream(
            caller,
            SessionCommand::SendToAll {
                path: path.into(),
                message: message.into(),
            },
        );
    }

    /// Deliver `message` to every subscriber of `topic`
    pub fn publish(&self, caller: &CallerRef, topic: impl Into<String>, message: impl Into<Message>) {
        self.stream(
            caller,
            SessionCommand::Publish {
                topic: topic.into(),
                message: message.into(),
            },
        );
    }

    fn stream(&self, caller: &CallerRef, command: SessionCommand) {
        if self.inner.scope.is_shutdown() {
            debug!("Client shut down, dropping {} from {}", command.kind(), caller.id());
            return;
        }
        let command = ClientCommand::Stream {
            caller: caller.clone(),
            command,
        };
        if self.inner.commands.send(command).is_err() {
            debug!("Client command loop stopped, dropping command from {}", caller.id());
        }
    }

    /// One-shot request/reply outside any session
    pub async fn send_ask(
        &self,
        path: impl Into<String>,
        message: impl Into<Message>,
        prefer_local: bool,
    ) -> Result<Message, GatewayError> {
        if self.inner.scope.is_shutdown() {
            return Err(GatewayError::Shutdown);
        }
        let metrics = self.inner.metrics.as_deref();
        let path = path.into();

        let payload = self.inner.codec.encode(&message.into()).map_err(|e| {
            if let Some(metrics) = metrics {
                metrics.encode_failed(SIDE_CLIENT);
            }
            e
        })?;
        if let Some(metrics) = metrics {
            metrics.ask_started(SIDE_CLIENT);
        }

        let request = SendRequest {
            path: path.clone(),
            payload,
            prefer_local,
        };
        let reply = match tokio::time::timeout(
            self.inner.settings.ask_timeout,
            self.inner.transport.ask_send(request),
        )
        .await
        {
            Ok(reply) => reply?,
            Err(_) => {
                debug!(
                    "Ask to '{}' timed out after {:?}",
                    path, self.inner.settings.ask_timeout
                );
                if let Some(metrics) = metrics {
                    metrics.ask_timed_out(SIDE_CLIENT);
                }
                return Err(GatewayError::Timeout);
            }
        };

        self.inner.codec.decode(&reply.payload).map_err(|e| {
            warn!("Ask to '{}': undecodable reply: {}", path, e);
            if let Some(metrics) = metrics {
                metrics.decode_failed(SIDE_CLIENT);
            }
            e.into()
        })
    }

    /// Number of callers with a pending or live session
    pub async fn session_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.inner.commands.send(ClientCommand::SessionCount(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Terminate every session of this client. Idempotent.
    pub fn shutdown(&self) -> bool {
        self.inner.scope.shutdown()
    }
}

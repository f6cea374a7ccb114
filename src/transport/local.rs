//! In-process transport
//!
//! Connects a client straight to a [`GatewayServer`] in the same process,
//! without any framing.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{GatewayError, ProtocolError, TransportError};
use crate::protocol::{Reply, Request, SendRequest};
use crate::server::GatewayServer;

use super::{ReplyStream, Transport, REPLY_CHANNEL_CAPACITY};

#[derive(Clone)]
pub struct LocalTransport {
    server: GatewayServer,
}

impl LocalTransport {
    pub fn new(server: GatewayServer) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn open_session(
        &self,
        outbound: mpsc::Receiver<Request>,
    ) -> Result<ReplyStream, TransportError> {
        let inbound = Box::pin(futures_util::stream::unfold(outbound, |mut rx| async move {
            rx.recv()
                .await
                .map(|request| (Ok::<_, ProtocolError>(request), rx))
        }));
        let mut session = self.server.open_session(inbound);

        let (tx, rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(reply) = session.replies.recv().await {
                if tx.send(Ok(reply)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn ask_send(&self, request: SendRequest) -> Result<Reply, GatewayError> {
        self.server.ask_send(request).await
    }
}

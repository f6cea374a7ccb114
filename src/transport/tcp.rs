//! TCP transport
//!
//! One connection per session and one per ask, framed as described in
//! [`crate::protocol`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::error::{GatewayError, ProtocolError, TransportError};
use crate::protocol::{
    read_frame, write_frame, Frame, Reply, Request, SendRequest, PROTOCOL_VERSION,
};

use super::{ReplyStream, Transport, REPLY_CHANNEL_CAPACITY};

/// Connects to a receptionist over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    endpoint: String,
    connect_timeout: Duration,
    max_frame_size: usize,
}

impl TcpTransport {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration, max_frame_size: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            max_frame_size,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.connect_timeout,
            config.max_frame_size,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<(OwnedReadHalf, OwnedWriteHalf), TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| TransportError::ConnectTimeout)?
            .map_err(TransportError::Connect)?;
        stream.set_nodelay(true)?;
        Ok(stream.into_split())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open_session(
        &self,
        mut outbound: mpsc::Receiver<Request>,
    ) -> Result<ReplyStream, TransportError> {
        let (mut reader, mut writer) = self.connect().await?;

        write_frame(
            &mut writer,
            &Frame::OpenSession {
                version: PROTOCOL_VERSION,
            },
        )
        .await?;

        let session_id = match read_frame(&mut reader, self.max_frame_size).await? {
            Some(Frame::SessionOpened { session_id }) => session_id,
            Some(other) => {
                return Err(ProtocolError::UnexpectedFrame {
                    expected: "SessionOpened",
                    got: other.type_name(),
                }
                .into())
            }
            None => return Err(TransportError::Closed),
        };
        debug!("Session [{}] opened at {}", session_id, self.endpoint);

        // Writer: requests until the client closes `outbound`, then Goodbye
        let writer_session = session_id.clone();
        tokio::spawn(async move {
            while let Some(request) = outbound.recv().await {
                trace!("Session [{}]: sending {}", writer_session, request.kind());
                if let Err(e) = write_frame(&mut writer, &Frame::Request(request)).await {
                    debug!("Session [{}]: write failed: {}", writer_session, e);
                    return;
                }
            }
            let _ = write_frame(&mut writer, &Frame::Goodbye).await;
            let _ = writer.shutdown().await;
        });

        // Reader: replies until the receptionist says Goodbye
        let (tx, rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let max_frame_size = self.max_frame_size;
        tokio::spawn(async move {
            loop {
                let item = match read_frame(&mut reader, max_frame_size).await {
                    Ok(Some(Frame::Reply(reply))) => Ok(reply),
                    Ok(Some(Frame::Goodbye)) => return,
                    Ok(None) => Err(TransportError::Closed),
                    Ok(Some(other)) => Err(ProtocolError::UnexpectedFrame {
                        expected: "Reply",
                        got: other.type_name(),
                    }
                    .into()),
                    Err(e) => Err(e),
                };

                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    debug!("Session [{}]: reader finished", session_id);
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn ask_send(&self, request: SendRequest) -> Result<Reply, GatewayError> {
        let (mut reader, mut writer) = self.connect().await?;

        write_frame(
            &mut writer,
            &Frame::Ask {
                version: PROTOCOL_VERSION,
                request,
            },
        )
        .await?;

        match read_frame(&mut reader, self.max_frame_size).await? {
            Some(Frame::AskReply(reply)) => Ok(reply),
            Some(Frame::AskFailure { reason, message }) => {
                Err(GatewayError::from_failure(reason, message))
            }
            Some(other) => Err(ProtocolError::UnexpectedFrame {
                expected: "AskReply",
                got: other.type_name(),
            }
            .into()),
            None => Err(TransportError::Closed.into()),
        }
    }
}

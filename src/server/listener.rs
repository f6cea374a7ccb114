//! TCP front of the receptionist
//!
//! Each accepted connection is either a streaming session or a single ask
//! exchange, decided by its first frame.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, ProtocolError, TransportError};
use crate::metrics::SIDE_SERVER;
use crate::protocol::{check_version, read_frame, write_frame, Frame, Request, SendRequest};

use super::GatewayServer;

/// Time a fresh connection gets to send its first frame
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests read ahead of the dispatcher per connection
const INBOUND_CHANNEL_CAPACITY: usize = 64;

impl GatewayServer {
    /// Bind the configured address and serve until shut down
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(self.settings().bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shut down
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Receptionist listening on {}", listener.local_addr()?);
        let scope = self.scope().clone();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = scope.cancelled() => {
                    info!("Receptionist stopped accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer).await {
                            if e.is_remote_gone() {
                                debug!("Connection from {} closed: {}", peer, e);
                            } else {
                                info!("Connection from {} failed: {}", peer, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), TransportError> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        let max_frame_size = self.settings().max_frame_size;

        let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut reader, max_frame_size))
            .await
            .map_err(|_| {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "no handshake received",
                ))
            })??;

        match first {
            None => Ok(()),
            Some(Frame::OpenSession { version }) => {
                if let Err(e) = check_version(version) {
                    let _ = write_frame(&mut writer, &Frame::Goodbye).await;
                    return Err(e.into());
                }
                self.serve_session(peer, reader, writer).await
            }
            Some(Frame::Ask { version, request }) => {
                if let Err(e) = check_version(version) {
                    let failure = GatewayError::from(e.clone());
                    let _ = write_frame(
                        &mut writer,
                        &Frame::AskFailure {
                            reason: failure.failure_reason(),
                            message: failure.to_string(),
                        },
                    )
                    .await;
                    return Err(e.into());
                }
                self.serve_ask(&mut writer, request).await
            }
            Some(other) => Err(ProtocolError::UnexpectedFrame {
                expected: "OpenSession or Ask",
                got: other.type_name(),
            }
            .into()),
        }
    }

    async fn serve_session(
        &self,
        peer: SocketAddr,
        reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
    ) -> Result<(), TransportError> {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let max_frame_size = self.settings().max_frame_size;
        let reader_task = tokio::spawn(read_requests(peer, reader, max_frame_size, tx));

        let inbound = Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        let mut session = self.open_session(inbound);

        let result = async {
            write_frame(
                &mut writer,
                &Frame::SessionOpened {
                    session_id: session.id.to_string(),
                },
            )
            .await?;

            while let Some(reply) = session.replies.recv().await {
                write_frame(&mut writer, &Frame::Reply(reply)).await?;
            }
            write_frame(&mut writer, &Frame::Goodbye).await
        }
        .await;

        reader_task.abort();
        debug!("Session [{}] with {} closed", session.id, peer);
        result
    }

    async fn serve_ask(
        &self,
        writer: &mut OwnedWriteHalf,
        request: SendRequest,
    ) -> Result<(), TransportError> {
        let frame = match self.ask_send(request).await {
            Ok(reply) => Frame::AskReply(reply),
            Err(e) => Frame::AskFailure {
                reason: e.failure_reason(),
                message: e.to_string(),
            },
        };
        write_frame(writer, &frame).await?;
        if let Some(ref metrics) = self.inner.metrics {
            metrics.reply(SIDE_SERVER);
        }
        Ok(())
    }
}

/// Turn request frames into the inbound stream of a session
async fn read_requests(
    peer: SocketAddr,
    mut reader: OwnedReadHalf,
    max_frame_size: usize,
    tx: mpsc::Sender<Result<Request, ProtocolError>>,
) {
    loop {
        let item = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(Frame::Request(request))) => Ok(request),
            Ok(Some(Frame::Goodbye)) | Ok(None) => return,
            Ok(Some(other)) => Err(ProtocolError::UnexpectedFrame {
                expected: "Request",
                got: other.type_name(),
            }),
            Err(TransportError::Protocol(e)) => Err(e),
            Err(e) => {
                debug!("Connection from {}: read failed: {}", peer, e);
                return;
            }
        };

        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            return;
        }
    }
}

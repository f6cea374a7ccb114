//! Transport Layer
//!
//! Client-side connectors to a receptionist. A transport opens duplex
//! sessions and performs one-shot asks; it never retries.

mod local;
mod tcp;

pub use local::LocalTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{GatewayError, TransportError};
use crate::protocol::{Reply, Request, SendRequest};

/// Inbound half of a session.
///
/// Ends without an error when the receptionist closes the session in an
/// orderly way; transport failures arrive as a final `Err` item.
pub type ReplyStream = mpsc::Receiver<Result<Reply, TransportError>>;

/// Replies read ahead of the client's session pipeline
pub(crate) const REPLY_CHANNEL_CAPACITY: usize = 16;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a session fed by `outbound`. Dropping the sender side of
    /// `outbound` closes the session from the client side.
    async fn open_session(
        &self,
        outbound: mpsc::Receiver<Request>,
    ) -> Result<ReplyStream, TransportError>;

    /// Single request/reply round trip outside any session
    async fn ask_send(&self, request: SendRequest) -> Result<Reply, GatewayError>;
}

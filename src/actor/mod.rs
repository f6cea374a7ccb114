//! Actor References
//!
//! Minimal mailbox handles for the actors registered with the dispatch
//! mediator. The gateway never runs actors itself; it only needs a way to
//! hand them a message together with the target for their replies.

mod caller;
mod reply;

pub use caller::{CallerId, CallerInbox, CallerRef};
pub use reply::{AskReply, ReplySink, ReplyTo};

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::Message;

/// A message handed to an actor
#[derive(Debug)]
pub struct Delivery {
    pub message: Message,
    /// Where replies to this message should go
    pub reply_to: ReplyTo,
}

/// Handle to an actor's mailbox
#[derive(Clone)]
pub struct ActorRef {
    path: Arc<str>,
    local: bool,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Receiving end of an actor's mailbox
pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl ActorRef {
    /// Create an actor living on this node
    pub fn new(path: impl Into<Arc<str>>) -> (ActorRef, Mailbox) {
        Self::with_locality(path, true)
    }

    /// Create an actor that the mediator treats as living on another node
    pub fn remote(path: impl Into<Arc<str>>) -> (ActorRef, Mailbox) {
        Self::with_locality(path, false)
    }

    fn with_locality(path: impl Into<Arc<str>>, local: bool) -> (ActorRef, Mailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ActorRef {
                path: path.into(),
                local,
                tx,
            },
            Mailbox { rx },
        )
    }

    /// Path elements of the actor, e.g. `/user/service`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Enqueue a message; false if the actor is terminated
    pub fn tell(&self, message: Message, reply_to: ReplyTo) -> bool {
        self.tx.send(Delivery { message, reply_to }).is_ok()
    }
}

impl ReplySink for ActorRef {
    fn deliver(&self, message: Message) -> bool {
        self.tell(message, ReplyTo::none())
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

impl Eq for ActorRef {}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("path", &self.path)
            .field("local", &self.local)
            .finish()
    }
}

impl Mailbox {
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting messages; the actor counts as terminated afterwards
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Service that answers every message with the message itself
pub struct EchoService;

impl EchoService {
    /// Spawn an echo actor at `path` and return its reference
    pub fn spawn(path: impl Into<Arc<str>>) -> ActorRef {
        let (actor, mut mailbox) = ActorRef::new(path);
        let path = actor.path().to_string();

        tokio::spawn(async move {
            while let Some(delivery) = mailbox.recv().await {
                debug!(
                    "Echo '{}': replying with {}",
                    path,
                    delivery.message.type_name()
                );
                delivery.reply_to.tell(delivery.message);
            }
        });

        actor
    }
}

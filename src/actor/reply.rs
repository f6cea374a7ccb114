//! Reply targets
//!
//! Everything a dispatched message can be answered to: a session's reply
//! buffer, a one-shot ask continuation, another actor, or nobody.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::codec::Message;

/// Destination for replies
pub trait ReplySink: Send + Sync {
    /// Deliver a reply. Returns false once the sink can no longer accept replies.
    fn deliver(&self, message: Message) -> bool;
}

/// Clonable handle to the sink a recipient should answer to
#[derive(Clone, Default)]
pub struct ReplyTo {
    sink: Option<Arc<dyn ReplySink>>,
}

impl ReplyTo {
    pub fn new(sink: Arc<dyn ReplySink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// A reply target that discards everything
    pub fn none() -> Self {
        Self { sink: None }
    }

    /// Send a reply, returns false if it was discarded
    pub fn tell(&self, message: impl Into<Message>) -> bool {
        match &self.sink {
            Some(sink) => sink.deliver(message.into()),
            None => false,
        }
    }
}

impl fmt::Debug for ReplyTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sink {
            Some(_) => write!(f, "ReplyTo(sink)"),
            None => write!(f, "ReplyTo(none)"),
        }
    }
}

/// Completes a oneshot with the first reply; later replies are discarded
pub struct AskReply {
    tx: Mutex<Option<oneshot::Sender<Message>>>,
}

impl AskReply {
    /// Create a reply target and the receiver that completes with the first reply
    pub fn channel() -> (ReplyTo, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        let sink = Arc::new(AskReply {
            tx: Mutex::new(Some(tx)),
        });
        (ReplyTo::new(sink), rx)
    }
}

impl ReplySink for AskReply {
    fn deliver(&self, message: Message) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

//! External callers
//!
//! A caller is the identity on whose behalf the gateway client opens a
//! session. Replies are delivered to its inbox; dropping or stopping the
//! inbox terminates the caller, which the client observes to tear the
//! session down.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::codec::Message;

static NEXT_CALLER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a caller within this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerId(u64);

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "caller-{}", self.0)
    }
}

/// Address of a caller; clone freely
#[derive(Clone)]
pub struct CallerRef {
    id: CallerId,
    tx: mpsc::UnboundedSender<Message>,
}

/// Receiving end of a caller
pub struct CallerInbox {
    id: CallerId,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl CallerRef {
    /// Create a new caller identity and its inbox
    pub fn new() -> (CallerRef, CallerInbox) {
        let id = CallerId(NEXT_CALLER_ID.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        (CallerRef { id, tx }, CallerInbox { id, rx })
    }

    pub fn id(&self) -> CallerId {
        self.id
    }

    /// Deliver a reply; false if the caller is terminated
    pub fn tell(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn is_terminated(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the caller is terminated
    pub async fn terminated(&self) {
        self.tx.closed().await
    }
}

impl fmt::Debug for CallerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerRef").field("id", &self.id).finish()
    }
}

impl PartialEq for CallerRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CallerRef {}

impl CallerInbox {
    pub fn id(&self) -> CallerId {
        self.id
    }

    /// Next reply, or None once terminated and drained
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Terminate the caller; buffered replies can still be drained
    pub fn stop(&mut self) {
        self.rx.close();
    }
}

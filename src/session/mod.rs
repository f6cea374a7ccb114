//! Gateway Sessions
//!
//! A session is a long-lived bidirectional stream between one caller and the
//! receptionist. Both ends buffer into an [`OverflowQueue`] so producers never
//! block, and every session belongs to the [`CancellationScope`] of the
//! gateway instance that created it.

mod queue;
mod scope;

pub use queue::{Offer, OverflowQueue};
pub use scope::CancellationScope;

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Session identifier, unique per session opened on a receptionist
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Producer side of a session's outbound buffer
pub struct SessionHandle<T> {
    id: SessionId,
    outbound: Arc<OverflowQueue<T>>,
}

impl<T> SessionHandle<T> {
    pub fn new(id: SessionId, buffer_size: usize) -> Self {
        Self {
            id,
            outbound: Arc::new(OverflowQueue::new(buffer_size)),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Buffer an element for the session, never blocks
    pub fn enqueue(&self, item: T) -> Offer {
        self.outbound.offer(item)
    }

    /// Consumer side, shared with the session pipeline
    pub fn queue(&self) -> Arc<OverflowQueue<T>> {
        self.outbound.clone()
    }

    pub fn close(&self) {
        self.outbound.close();
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl<T> Clone for SessionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            outbound: self.outbound.clone(),
        }
    }
}

impl<T> fmt::Debug for SessionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("buffered", &self.outbound.len())
            .field("closed", &self.outbound.is_closed())
            .finish()
    }
}

//! Dispatch Mediator
//!
//! The cluster's internal routing fabric as seen by the gateway. The gateway
//! only hands messages to a [`DispatchMediator`]; how targets are found is up
//! to the implementation. [`LocalMediator`] is an in-process registry used by
//! the standalone receptionist and the tests.

mod local;


pub use local::LocalMediator;

use serde::{Deserialize, Serialize};

use crate::actor::{ActorRef, ReplyTo};
use crate::codec::Message;
use crate::error::RegistrationError;

/// Routing capability consumed by the gateway server
///
/// All dispatch calls are fire-and-forget: they return once the message has
/// been handed to the target mailboxes, with the number of deliveries made.
pub trait DispatchMediator: Send + Sync + 'static {
    /// Deliver to one actor registered at `path`
    fn send(&self, path: &str, message: Message, reply_to: ReplyTo, prefer_local: bool) -> usize;

    /// Deliver to every actor registered at `path`
    fn send_to_all(&self, path: &str, message: Message, reply_to: ReplyTo) -> usize;

    /// Deliver to every subscriber of `topic`
    fn publish(&self, topic: &str, message: Message, reply_to: ReplyTo) -> usize;

    fn register(&self, path: &str, actor: ActorRef) -> Result<(), RegistrationError>;

    /// Remove the actor from every path it is registered at
    fn unregister(&self, actor: &ActorRef);

    fn subscribe(&self, topic: &str, actor: ActorRef) -> Result<(), RegistrationError>;

    fn unsubscribe(&self, topic: &str, actor: &ActorRef);
}

/// Reply sent when a `send` finds no actor at the requested path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoRouteFound {
    pub path: String,
}

//! VibeGate - gateway between external clients and a cluster's actors
//!
//! Clients outside the cluster talk to a receptionist over a duplex session
//! per caller. Requests are dispatched through the cluster's mediator and
//! replies are streamed back to the originating caller.

pub mod actor;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod mediator;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use actor::{ActorRef, CallerInbox, CallerRef, EchoService, Mailbox};
pub use client::{ClientSettings, GatewayClient};
pub use codec::{CodecRegistry, Message, PayloadEnvelope};
pub use config::Config;
pub use error::{GatewayError, TransportError};
pub use mediator::{DispatchMediator, LocalMediator, NoRouteFound};
pub use metrics::{GatewayMetrics, MetricsServer};
pub use server::{GatewayServer, ServerSettings};
pub use session::CancellationScope;
pub use transport::{LocalTransport, TcpTransport, Transport};

//! Gateway error types
//!
//! Codec failures live in [`crate::codec`]; everything that can go wrong on
//! the wire, in the mediator or on the ask path is collected here and folded
//! into [`GatewayError`] for the public API.

use std::fmt;
use std::io;

use bincode::{Decode, Encode};

use crate::codec::{DecodeError, EncodeError};

/// Malformed or unexpected traffic on a gateway connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame could not be decoded (includes unknown request variants)
    Malformed(String),
    /// A well-formed frame arrived where it is not allowed
    UnexpectedFrame {
        expected: &'static str,
        got: &'static str,
    },
    /// Peer speaks another protocol version
    VersionMismatch { ours: u8, theirs: u8 },
    /// Frame length exceeds the configured maximum
    FrameTooLarge { size: usize, max: usize },
    /// The remote side reported a protocol failure (ask path)
    Remote(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed frame: {}", msg),
            Self::UnexpectedFrame { expected, got } => {
                write!(f, "unexpected frame: expected {}, got {}", expected, got)
            }
            Self::VersionMismatch { ours, theirs } => {
                write!(f, "protocol version mismatch: {} vs {}", ours, theirs)
            }
            Self::FrameTooLarge { size, max } => {
                write!(f, "frame of {} bytes exceeds maximum of {}", size, max)
            }
            Self::Remote(msg) => write!(f, "remote protocol failure: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<bincode::error::DecodeError> for ProtocolError {
    fn from(e: bincode::error::DecodeError) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for ProtocolError {
    fn from(e: bincode::error::EncodeError) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}

/// Session or connection failure not caused by the owner going away
#[derive(Debug)]
pub enum TransportError {
    /// Could not establish the connection
    Connect(io::Error),
    /// Connection attempt exceeded the connect timeout
    ConnectTimeout,
    /// I/O failure on an established connection
    Io(io::Error),
    /// Remote end closed the stream
    Closed,
    /// Peer violated the wire protocol
    Protocol(ProtocolError),
    /// The remote side reported a transport failure (ask path)
    Remote(String),
}

impl TransportError {
    /// Whether this error only says that the other end is already gone
    pub fn is_remote_gone(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {}", e),
            Self::ConnectTimeout => write!(f, "connect timed out"),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Closed => write!(f, "remote end closed the stream"),
            Self::Protocol(e) => write!(f, "{}", e),
            Self::Remote(msg) => write!(f, "remote transport failure: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) | Self::Io(e) => Some(e),
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<ProtocolError> for TransportError {
    fn from(e: ProtocolError) -> Self {
        TransportError::Protocol(e)
    }
}

/// The mediator refused a registration or subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Service paths must be absolute, e.g. `/user/service`
    InvalidPath(String),
    /// Topic names must not be empty
    EmptyTopic,
    /// The actor's mailbox is already closed
    ActorTerminated(String),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath(path) => write!(f, "invalid service path: '{}'", path),
            Self::EmptyTopic => write!(f, "topic must not be empty"),
            Self::ActorTerminated(path) => write!(f, "actor '{}' is terminated", path),
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Failure kind reported back to the client on the ask path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum FailureReason {
    Encode,
    Decode,
    Protocol,
    Transport,
    Timeout,
}

/// Any failure surfaced by the gateway API
#[derive(Debug)]
pub enum GatewayError {
    Encode(EncodeError),
    Decode(DecodeError),
    Protocol(ProtocolError),
    Transport(TransportError),
    /// Ask deadline exceeded, or no reply can arrive any more
    Timeout,
    Registration(RegistrationError),
    /// The gateway instance has been shut down
    Shutdown,
}

impl GatewayError {
    /// Classify this error for transmission to the client
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Encode(_) => FailureReason::Encode,
            Self::Decode(_) => FailureReason::Decode,
            Self::Protocol(_) => FailureReason::Protocol,
            Self::Timeout => FailureReason::Timeout,
            Self::Transport(_) | Self::Registration(_) | Self::Shutdown => {
                FailureReason::Transport
            }
        }
    }

    /// Rebuild an error received from the server
    pub fn from_failure(reason: FailureReason, message: String) -> Self {
        match reason {
            FailureReason::Encode => Self::Encode(EncodeError::Remote(message)),
            FailureReason::Decode => Self::Decode(DecodeError::Remote(message)),
            FailureReason::Protocol => Self::Protocol(ProtocolError::Remote(message)),
            FailureReason::Transport => Self::Transport(TransportError::Remote(message)),
            FailureReason::Timeout => Self::Timeout,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "encode error: {}", e),
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Timeout => write!(f, "request timed out"),
            Self::Registration(e) => write!(f, "registration error: {}", e),
            Self::Shutdown => write!(f, "gateway is shut down"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Registration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EncodeError> for GatewayError {
    fn from(e: EncodeError) -> Self {
        GatewayError::Encode(e)
    }
}

impl From<DecodeError> for GatewayError {
    fn from(e: DecodeError) -> Self {
        GatewayError::Decode(e)
    }
}

impl From<ProtocolError> for GatewayError {
    fn from(e: ProtocolError) -> Self {
        GatewayError::Protocol(e)
    }
}

impl From<TransportError> for GatewayError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Protocol(p) => GatewayError::Protocol(p),
            other => GatewayError::Transport(other),
        }
    }
}

impl From<RegistrationError> for GatewayError {
    fn from(e: RegistrationError) -> Self {
        GatewayError::Registration(e)
    }
}

impl From<io::Error> for GatewayError {
    fn from(e: io::Error) -> Self {
        GatewayError::Transport(TransportError::Io(e))
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

//! Payload codec error types

use std::fmt;

/// Errors that can occur while turning a message into a payload envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// No serializer registered for the runtime type of the message
    NoSerializer(&'static str),
    /// The serializer rejected the value
    Serializer { codec_id: u32, reason: String },
    /// The remote side failed to encode (ask path)
    Remote(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSerializer(type_name) => {
                write!(f, "no serializer registered for type {}", type_name)
            }
            Self::Serializer { codec_id, reason } => {
                write!(f, "serializer {} failed: {}", codec_id, reason)
            }
            Self::Remote(msg) => write!(f, "remote encode failure: {}", msg),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Errors that can occur while reconstructing a message from a payload envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The codec id is not known to this registry
    UnknownCodec(u32),
    /// The codec is known but no type is bound to this tag
    UnknownTypeTag { codec_id: u32, type_tag: String },
    /// The bytes do not parse under the selected serializer
    Malformed {
        codec_id: u32,
        type_tag: String,
        reason: String,
    },
    /// The remote side failed to decode (ask path)
    Remote(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCodec(id) => write!(f, "unknown codec id: {}", id),
            Self::UnknownTypeTag { codec_id, type_tag } => {
                write!(f, "unknown type tag '{}' for codec {}", type_tag, codec_id)
            }
            Self::Malformed {
                codec_id,
                type_tag,
                reason,
            } => write!(
                f,
                "malformed payload for codec {} type tag '{}': {}",
                codec_id, type_tag, reason
            ),
            Self::Remote(msg) => write!(f, "remote decode failure: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

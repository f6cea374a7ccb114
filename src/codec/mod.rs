//! Payload Codec
//!
//! Turns arbitrary application messages into self-describing payload
//! envelopes and back. An envelope carries the serializer identifier and a
//! type tag next to the bytes, so the receiving side can rebuild the value
//! without any other context.
//!
//! The registry is built once at startup and never mutated afterwards, which
//! makes it safe to share between sessions without locking.

mod error;
pub mod serializer;

#[cfg(test)]
mod tests;

pub use error::{DecodeError, EncodeError};
pub use serializer::{Binary, Json, RawBytes, Serializer, Utf8};

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bincode::{Decode, Encode};
use bytes::Bytes;
use tracing::debug;

use crate::mediator::NoRouteFound;

/// Type tag of the mediator's "no route" indicator
pub const NO_ROUTE_FOUND_TAG: &str = "vibegate.NoRouteFound";

/// Serialized form of an application message
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PayloadEnvelope {
    /// Serialized message
    pub bytes: Vec<u8>,
    /// Identifier of the serializer that produced `bytes`
    pub codec_id: u32,
    /// Concrete type within that serializer
    pub type_tag: String,
}

/// A type-erased application message.
///
/// Cloning is cheap; the value itself is shared.
#[derive(Clone)]
pub struct Message {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Message {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Borrow the value as `T` if that is its concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Name of the concrete type, for logging
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn value_type_id(&self) -> TypeId {
        (*self.value).type_id()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.type_name)
            .finish()
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::new(value)
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::new(value.to_string())
    }
}

impl From<Bytes> for Message {
    fn from(value: Bytes) -> Self {
        Message::new(value)
    }
}

/// Object-safe view of one type bound to one serializer
trait Binding: Send + Sync {
    fn codec_id(&self) -> u32;
    fn type_tag(&self) -> &str;
    fn encode(&self, message: &Message) -> Result<Vec<u8>, EncodeError>;
    fn decode(&self, bytes: &[u8]) -> Result<Message, DecodeError>;
}

struct TypedBinding<T, S> {
    type_tag: String,
    serializer: S,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S> Binding for TypedBinding<T, S>
where
    T: Any + Send + Sync,
    S: Serializer<T>,
{
    fn codec_id(&self) -> u32 {
        self.serializer.identifier()
    }

    fn type_tag(&self) -> &str {
        &self.type_tag
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, EncodeError> {
        let value = message
            .downcast_ref::<T>()
            .ok_or(EncodeError::NoSerializer(message.type_name()))?;
        self.serializer
            .to_binary(value)
            .map_err(|reason| EncodeError::Serializer {
                codec_id: self.codec_id(),
                reason,
            })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, DecodeError> {
        self.serializer
            .from_binary(bytes)
            .map(Message::new)
            .map_err(|reason| DecodeError::Malformed {
                codec_id: self.codec_id(),
                type_tag: self.type_tag.clone(),
                reason,
            })
    }
}

/// Immutable registry of serializers, keyed by runtime type for encoding and
/// by `(codec_id, type_tag)` for decoding.
pub struct CodecRegistry {
    by_type: HashMap<TypeId, Arc<dyn Binding>>,
    by_tag: HashMap<(u32, String), Arc<dyn Binding>>,
    codec_ids: HashSet<u32>,
}

impl CodecRegistry {
    pub fn builder() -> CodecRegistryBuilder {
        CodecRegistryBuilder::new()
    }

    /// Registry with the built-in bindings only
    pub fn with_defaults() -> Self {
        Self::builder().with_defaults().build()
    }

    /// Serialize a message into a payload envelope
    pub fn encode(&self, message: &Message) -> Result<PayloadEnvelope, EncodeError> {
        let binding = self
            .by_type
            .get(&message.value_type_id())
            .ok_or(EncodeError::NoSerializer(message.type_name()))?;

        Ok(PayloadEnvelope {
            bytes: binding.encode(message)?,
            codec_id: binding.codec_id(),
            type_tag: binding.type_tag().to_string(),
        })
    }

    /// Rebuild a message from a payload envelope
    pub fn decode(&self, envelope: &PayloadEnvelope) -> Result<Message, DecodeError> {
        if !self.codec_ids.contains(&envelope.codec_id) {
            return Err(DecodeError::UnknownCodec(envelope.codec_id));
        }

        let binding = self
            .by_tag
            .get(&(envelope.codec_id, envelope.type_tag.clone()))
            .ok_or_else(|| DecodeError::UnknownTypeTag {
                codec_id: envelope.codec_id,
                type_tag: envelope.type_tag.clone(),
            })?;

        binding.decode(&envelope.bytes)
    }

    /// Number of bound types
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.codec_ids.iter().copied().collect();
        ids.sort_unstable();
        f.debug_struct("CodecRegistry")
            .field("types", &self.by_type.len())
            .field("codec_ids", &ids)
            .finish()
    }
}

/// Collects bindings before freezing them into a [`CodecRegistry`]
pub struct CodecRegistryBuilder {
    bindings: Vec<(TypeId, Arc<dyn Binding>)>,
}

impl CodecRegistryBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add the built-in bindings: `String`, `Bytes` and the mediator's
    /// "no route" indicator
    pub fn with_defaults(self) -> Self {
        self.register_as::<String, _>("", Utf8)
            .register_as::<Bytes, _>("", RawBytes)
            .register_as::<NoRouteFound, _>(NO_ROUTE_FOUND_TAG, Json)
    }

    /// Bind `T` to a serializer using the type name as tag
    pub fn register<T, S>(self, serializer: S) -> Self
    where
        T: Any + Send + Sync,
        S: Serializer<T>,
    {
        self.register_as::<T, S>(std::any::type_name::<T>(), serializer)
    }

    /// Bind `T` to a serializer under an explicit type tag.
    ///
    /// Later bindings for the same type or the same `(codec, tag)` pair
    /// replace earlier ones. A replaced type binding is dropped entirely, so
    /// payloads under its old tag no longer decode.
    pub fn register_as<T, S>(mut self, type_tag: impl Into<String>, serializer: S) -> Self
    where
        T: Any + Send + Sync,
        S: Serializer<T>,
    {
        let binding: Arc<dyn Binding> = Arc::new(TypedBinding::<T, S> {
            type_tag: type_tag.into(),
            serializer,
            _marker: PhantomData,
        });
        self.bindings.push((TypeId::of::<T>(), binding));
        self
    }

    pub fn build(self) -> CodecRegistry {
        let latest: HashMap<TypeId, usize> = self
            .bindings
            .iter()
            .enumerate()
            .map(|(index, (type_id, _))| (*type_id, index))
            .collect();

        let mut by_type = HashMap::new();
        let mut by_tag = HashMap::new();
        let mut codec_ids = HashSet::new();

        for (index, (type_id, binding)) in self.bindings.into_iter().enumerate() {
            // A rebound type neither encodes nor decodes through its old binding
            if latest[&type_id] != index {
                debug!(
                    "Codec binding {} tag '{}' superseded",
                    binding.codec_id(),
                    binding.type_tag()
                );
                continue;
            }

            let key = (binding.codec_id(), binding.type_tag().to_string());
            codec_ids.insert(binding.codec_id());
            if by_tag.insert(key.clone(), binding.clone()).is_some() {
                debug!(
                    "Codec binding for codec {} tag '{}' replaced",
                    key.0, key.1
                );
            }
            by_type.insert(type_id, binding);
        }

        CodecRegistry {
            by_type,
            by_tag,
            codec_ids,
        }
    }
}

impl Default for CodecRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

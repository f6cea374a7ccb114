//! Built-in payload serializers
//!
//! Each serializer has a stable numeric identifier that travels in the
//! payload envelope. Identifiers must never be reused for a different format.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Identifier of the raw bytes serializer
pub const RAW_BYTES_ID: u32 = 4;
/// Identifier of the UTF-8 string serializer
pub const UTF8_ID: u32 = 20;
/// Identifier of the JSON serializer
pub const JSON_ID: u32 = 31;
/// Identifier of the compact binary serializer
pub const BINARY_ID: u32 = 33;

/// Converts values of one type to and from bytes.
///
/// A serializer may support many types; the registry binds each
/// `(identifier, type tag)` pair to exactly one of them.
pub trait Serializer<T>: Send + Sync + 'static {
    /// Stable identifier written into every envelope this serializer produces
    fn identifier(&self) -> u32;

    fn to_binary(&self, value: &T) -> Result<Vec<u8>, String>;

    fn from_binary(&self, bytes: &[u8]) -> Result<T, String>;
}

/// Passes bytes through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytes;

impl Serializer<Bytes> for RawBytes {
    fn identifier(&self) -> u32 {
        RAW_BYTES_ID
    }

    fn to_binary(&self, value: &Bytes) -> Result<Vec<u8>, String> {
        Ok(value.to_vec())
    }

    fn from_binary(&self, bytes: &[u8]) -> Result<Bytes, String> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// Strings as plain UTF-8
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8;

impl Serializer<String> for Utf8 {
    fn identifier(&self) -> u32 {
        UTF8_ID
    }

    fn to_binary(&self, value: &String) -> Result<Vec<u8>, String> {
        Ok(value.as_bytes().to_vec())
    }

    fn from_binary(&self, bytes: &[u8]) -> Result<String, String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())
    }
}

/// Any serde type as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl<T> Serializer<T> for Json
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn identifier(&self) -> u32 {
        JSON_ID
    }

    fn to_binary(&self, value: &T) -> Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|e| e.to_string())
    }

    fn from_binary(&self, bytes: &[u8]) -> Result<T, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

/// Any serde type in bincode's compact format
#[derive(Debug, Clone, Copy, Default)]
pub struct Binary;

impl<T> Serializer<T> for Binary
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn identifier(&self) -> u32 {
        BINARY_ID
    }

    fn to_binary(&self, value: &T) -> Result<Vec<u8>, String> {
        bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| e.to_string())
    }

    fn from_binary(&self, bytes: &[u8]) -> Result<T, String> {
        let (value, read) =
            bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())
                .map_err(|e| e.to_string())?;
        if read != bytes.len() {
            return Err(format!("{} trailing bytes", bytes.len() - read));
        }
        Ok(value)
    }
}

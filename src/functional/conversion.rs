//! Conversion between stored bytes and the typed values functions work with.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{GridError, GridResult};

/// Converts raw stored values into a function's value domain and back.
pub trait ValueConversion<V>: Send + Sync {
    fn from_storage(&self, raw: &Bytes) -> GridResult<V>;

    fn to_storage(&self, value: &V) -> GridResult<Bytes>;

    /// Short name used in logs and command descriptions.
    fn name(&self) -> &'static str;
}

/// Passes stored bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConversion;

impl ValueConversion<Bytes> for IdentityConversion {
    fn from_storage(&self, raw: &Bytes) -> GridResult<Bytes> {
        Ok(raw.clone())
    }

    fn to_storage(&self, value: &Bytes) -> GridResult<Bytes> {
        Ok(value.clone())
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Stores values as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Conversion;

impl ValueConversion<String> for Utf8Conversion {
    fn from_storage(&self, raw: &Bytes) -> GridResult<String> {
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| GridError::Conversion(format!("invalid UTF-8 value: {}", e)))
    }

    fn to_storage(&self, value: &String) -> GridResult<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn name(&self) -> &'static str {
        "utf8"
    }
}

/// Stores values as JSON documents.
pub struct JsonConversion<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonConversion<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonConversion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonConversion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonConversion")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> ValueConversion<T> for JsonConversion<T>
where
    T: Serialize + DeserializeOwned,
{
    fn from_storage(&self, raw: &Bytes) -> GridResult<T> {
        Ok(serde_json::from_slice(raw)?)
    }

    fn to_storage(&self, value: &T) -> GridResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::DecodeError;
use crate::message::RawMessage;

/// Turns a message payload into the caller's type. Decoding is per message
/// and stateless; a failure only drops the message it belongs to.
pub trait Decoder: Send + Sync {
    type Output: Send + 'static;

    fn decode(&self, payload: &[u8]) -> Result<Self::Output, DecodeError>;

    /// Decode a whole message, treating a missing payload as a failure.
    fn decode_message(&self, message: &RawMessage) -> Result<Self::Output, DecodeError> {
        let payload = message.payload().ok_or(DecodeError::EmptyPayload)?;
        self.decode(payload)
    }
}

impl<D: Decoder + ?Sized> Decoder for Arc<D> {
    type Output = D::Output;

    fn decode(&self, payload: &[u8]) -> Result<Self::Output, DecodeError> {
        (**self).decode(payload)
    }
}

pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Decoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn decode(&self, payload: &[u8]) -> Result<T, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Adapts a plain function into a `Decoder`
pub struct FnDecoder<F, T> {
    decode_fn: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> FnDecoder<F, T>
where
    F: Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync,
    T: Send + 'static,
{
    pub fn new(decode_fn: F) -> Self {
        Self {
            decode_fn,
            _marker: PhantomData,
        }
    }
}

impl<F, T> Decoder for FnDecoder<F, T>
where
    F: Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync,
    T: Send + 'static,
{
    type Output = T;

    fn decode(&self, payload: &[u8]) -> Result<T, DecodeError> {
        (self.decode_fn)(payload)
    }
}

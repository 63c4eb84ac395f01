//! Value codecs used by the built-in decode handlers.
//!
//! A codec turns the raw bytes of a store entry into a typed value, starting
//! from a seed produced by the binding's target constructor. Fields absent
//! from the payload keep the seed's values, which is how defaults declared in
//! code survive partial documents stored remotely.

mod json;
pub use json::*;


/// Error returned by a codec; the calling handler attaches the store key
pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

/// Decodes raw store bytes into `T`
pub trait Codec<T>: Send + Sync {
    fn decode(
        &self,
        seed: T,
        bytes: &[u8],
    ) -> std::result::Result<T, CodecError>;
}

/// Decodes values as UTF-8 text; the seed is discarded
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec<String> for TextCodec {
    fn decode(
        &self,
        _seed: String,
        bytes: &[u8],
    ) -> std::result::Result<String, CodecError> {
        Ok(std::str::from_utf8(bytes)?.to_string())
    }
}

//! Payload serializers
//!
//! Serializers are stored as trait objects, so values cross the trait
//! boundary through `erased-serde`. Use [`encode_value`] and [`decode_value`]
//! for the typed view.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{SerializationError, SerializationResult};

/// Callback handed an erased deserializer positioned at the payload
pub type DecodeVisitor<'a> =
    &'a mut dyn FnMut(&mut dyn erased_serde::Deserializer<'_>) -> Result<(), erased_serde::Error>;

/// Turns typed values into payload bytes and back
pub trait Serializer: Send + Sync {
    /// Code carried in the frame's serializer byte
    fn code(&self) -> u8;

    /// Human-readable name
    fn name(&self) -> &'static str;

    /// Serialize a value
    fn encode(&self, value: &dyn erased_serde::Serialize) -> SerializationResult<Vec<u8>>;

    /// Run `visit` against a deserializer reading `data`
    fn decode(&self, data: &[u8], visit: DecodeVisitor<'_>) -> SerializationResult<()>;
}

/// Serialize a typed value with any serializer
pub fn encode_value<T: Serialize>(
    serializer: &dyn Serializer,
    value: &T,
) -> SerializationResult<Vec<u8>> {
    serializer.encode(value)
}

/// Deserialize a typed value with any serializer
pub fn decode_value<T: DeserializeOwned>(
    serializer: &dyn Serializer,
    data: &[u8],
) -> SerializationResult<T> {
    let mut decoded = None;
    serializer.decode(
        data,
        &mut |de: &mut dyn erased_serde::Deserializer<'_>| {
            decoded = Some(erased_serde::deserialize::<T>(de)?);
            Ok(())
        },
    )?;
    decoded.ok_or(SerializationError::NothingDecoded)
}

/// JSON payloads, the default serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub const CODE: u8 = 1;
}

impl Serializer for JsonSerializer {
    fn code(&self) -> u8 {
        Self::CODE
    }

    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &dyn erased_serde::Serialize) -> SerializationResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, data: &[u8], visit: DecodeVisitor<'_>) -> SerializationResult<()> {
        let mut de = serde_json::Deserializer::from_slice(data);
        visit(&mut <dyn erased_serde::Deserializer>::erase(&mut de))?;
        de.end()?;
        Ok(())
    }
}

/// Compact binary payloads via bincode
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub const CODE: u8 = 3;

    // Same settings as `bincode::serialize`
    fn options() -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes()
    }
}

impl Serializer for BincodeSerializer {
    fn code(&self) -> u8 {
        Self::CODE
    }

    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode(&self, value: &dyn erased_serde::Serialize) -> SerializationResult<Vec<u8>> {
        Ok(Self::options().serialize(value)?)
    }

    fn decode(&self, data: &[u8], visit: DecodeVisitor<'_>) -> SerializationResult<()> {
        let mut de = bincode::Deserializer::from_slice(data, Self::options());
        visit(&mut <dyn erased_serde::Deserializer>::erase(&mut de))?;
        Ok(())
    }
}

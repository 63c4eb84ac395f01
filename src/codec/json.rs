use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::Codec;
use super::CodecError;

/// JSON codec merging the payload over the serialized seed
///
/// Objects merge key by key, recursively. A `null` leaves the seed's value
/// in place; any other payload value replaces it.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn decode(
        &self,
        seed: T,
        bytes: &[u8],
    ) -> std::result::Result<T, CodecError> {
        let incoming: Value = serde_json::from_slice(bytes)?;
        let mut merged = serde_json::to_value(&seed)?;
        merge_json(&mut merged, incoming);
        Ok(serde_json::from_value(merged)?)
    }
}

pub(crate) fn merge_json(
    base: &mut Value,
    incoming: Value,
) {
    match (base, incoming) {
        (Value::Object(base), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, incoming) => *base = incoming,
    }
}

use serde::{de::DeserializeOwned, Serialize};

use super::{CacheError, CacheResult};

/// The encoding used by the keyed cache, injected at construction so the
/// store stays polymorphic over entity types without any per-call dispatch.
pub trait CacheCodec: Send + Sync + Clone {
    fn encode<T: Serialize>(&self, value: &T) -> CacheResult<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T>;
}

/// JSON encoding, the wire format everything else in the system speaks.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let codec = JsonCodec;

        let encoded = codec.encode(&vec![1, 2, 3]).expect("encodes");
        let decoded: Vec<i32> = codec.decode(&encoded).expect("decodes");

        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_rejects_mismatched_shape() {
        let codec = JsonCodec;

        let encoded = codec.encode(&"a string").expect("encodes");
        let result: CacheResult<Vec<i32>> = codec.decode(&encoded);

        assert!(result.is_err(), "wrong target type must not decode");
    }
}

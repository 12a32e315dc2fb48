//! Binary encoding for messages, registry records and hash input
//!
//! All wire payloads use bincode. Encoding is deterministic for a given value, which
//! partition hashing relies on.

use crate::errors::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value to bytes
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a value from bytes
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StrandError;

    #[test]
    fn test_encoding_is_deterministic() {
        let key = ("device-7".to_string(), 42_u32);
        assert_eq!(encode(&key).unwrap(), encode(&key).unwrap());
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let bytes = encode(&"a longer string").unwrap();
        let err = decode::<String>(&bytes[..3]).unwrap_err();
        assert!(matches!(err, StrandError::Serialization { .. }));
    }
}

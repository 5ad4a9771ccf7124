//! Serde helpers: raw key bytes travel as base64 strings in JSON.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{CryptoError, CryptoResult};

/// Base64-encode bytes (standard alphabet, padded).
pub fn b64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a base64 string into exactly `N` bytes.
pub fn b64_decode_array<const N: usize>(s: &str) -> CryptoResult<[u8; N]> {
    let decoded = STANDARD
        .decode(s.trim())
        .map_err(|e| CryptoError::Encoding(format!("base64 decode: {e}")))?;
    let actual = decoded.len();
    decoded
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: N,
            actual,
        })
}

/// `#[serde(with = "b64_array")]` for fixed-size byte arrays
pub mod b64_array {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::b64_encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::b64_decode_array(&s).map_err(D::Error::custom)
    }
}

/// `#[serde(with = "b64_vec")]` for variable-length byte strings
pub mod b64_vec {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(D::Error::custom)
    }
}

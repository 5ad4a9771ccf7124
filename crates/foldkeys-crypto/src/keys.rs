//! Key types: folder crypt key, folder and ephemeral X25519 key pairs, device keys

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

use crate::encoding::b64_array;
use crate::error::{CryptoError, CryptoResult};
use crate::{DEVICE_ID_SIZE, KEY_SIZE};

/// BLAKE3 derive-key context for device key identifiers
const DEVICE_ID_CONTEXT: &str = "foldkeys 2026-10 device key id";

/// The symmetric secret protecting one key generation of a folder.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct TlfCryptKey {
    bytes: [u8; KEY_SIZE],
}

impl TlfCryptKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Short, non-secret fingerprint for display and log correlation.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.bytes);
        hex::encode(&hash.as_bytes()[..8])
    }
}

impl PartialEq for TlfCryptKey {
    fn eq(&self, other: &Self) -> bool {
        blake3::Hash::from(self.bytes) == blake3::Hash::from(other.bytes)
    }
}

impl Eq for TlfCryptKey {}

impl Drop for TlfCryptKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for TlfCryptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlfCryptKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Public X25519 key newtype, serialized as base64.
macro_rules! public_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(#[serde(with = "b64_array")] [u8; KEY_SIZE]);

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), crate::encoding::b64_encode(&self.0))
            }
        }
    };
}

/// Private X25519 key newtype. Zeroized on drop, never serialized.
macro_rules! private_key {
    ($(#[$meta:meta])* $name:ident => $public:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self { bytes }
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.bytes
            }

            /// Derive the matching public key.
            pub fn public_key(&self) -> $public {
                $public::from_bytes(*self.to_box_key().public_key().as_bytes())
            }

            pub(crate) fn to_box_key(&self) -> crypto_box::SecretKey {
                crypto_box::SecretKey::from(self.bytes)
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.bytes.zeroize();
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

public_key!(
    /// Long-term public key of a folder generation, fixed when the generation is created.
    TlfPublicKey
);

public_key!(
    /// Public half of the one-time key pair used by a single provisioning event.
    TlfEphemeralPublicKey
);

impl TlfEphemeralPublicKey {
    pub(crate) fn to_box_key(self) -> crypto_box::PublicKey {
        crypto_box::PublicKey::from(self.0)
    }
}

private_key!(
    /// Long-term private key of a folder generation.
    TlfPrivateKey => TlfPublicKey
);

private_key!(
    /// Private half of a provisioning event's key pair; dropped once the event completes.
    TlfEphemeralPrivateKey => TlfEphemeralPublicKey
);

/// 8-byte key identifier of a device, derived from its public encryption key.
///
/// Displayed and serialized as lowercase hex so it can key JSON maps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId([u8; DEVICE_ID_SIZE]);

impl DeviceId {
    pub const fn from_bytes(bytes: [u8; DEVICE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; DEVICE_ID_SIZE] {
        &self.0
    }

    /// `BLAKE3-derive_key(DEVICE_ID_CONTEXT, public_key)[..8]`
    pub fn derive(public_key: &[u8; KEY_SIZE]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(DEVICE_ID_CONTEXT);
        hasher.update(public_key);
        let hash = hasher.finalize();
        let mut id = [0u8; DEVICE_ID_SIZE];
        id.copy_from_slice(&hash.as_bytes()[..DEVICE_ID_SIZE]);
        Self(id)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.to_hex())
    }
}

impl FromStr for DeviceId {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::Encoding(format!("device id: {e}")))?;
        let actual = bytes.len();
        let id: [u8; DEVICE_ID_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: DEVICE_ID_SIZE,
                    actual,
                })?;
        Ok(Self(id))
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A device's public encryption key together with its derived [`DeviceId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CryptPublicKey {
    kid: DeviceId,
    key: [u8; KEY_SIZE],
}

impl CryptPublicKey {
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self {
            kid: DeviceId::derive(&key),
            key,
        }
    }

    pub fn kid(&self) -> DeviceId {
        self.kid
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn to_base64(&self) -> String {
        crate::encoding::b64_encode(&self.key)
    }

    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        crate::encoding::b64_decode_array(s).map(Self::from_bytes)
    }

    pub(crate) fn to_box_key(self) -> crypto_box::PublicKey {
        crypto_box::PublicKey::from(self.key)
    }
}

impl fmt::Debug for CryptPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptPublicKey")
            .field("kid", &self.kid)
            .finish()
    }
}

// The KID is recomputed on load rather than trusted from disk.
impl Serialize for CryptPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for CryptPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// A device's private decryption key. Zeroized on drop.
#[derive(Clone)]
pub struct CryptPrivateKey {
    bytes: [u8; KEY_SIZE],
}

impl CryptPrivateKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn public_key(&self) -> CryptPublicKey {
        CryptPublicKey::from_bytes(*self.to_box_key().public_key().as_bytes())
    }

    pub(crate) fn to_box_key(&self) -> crypto_box::SecretKey {
        crypto_box::SecretKey::from(self.bytes)
    }
}

impl Drop for CryptPrivateKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for CryptPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptPrivateKey")
            .field("kid", &self.public_key().kid())
            .finish()
    }
}

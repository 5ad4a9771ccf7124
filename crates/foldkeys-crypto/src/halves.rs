//! Split representation of a folder crypt key.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

use crate::encoding::{b64_array, b64_vec};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::TlfCryptKey;
use crate::{KEY_SIZE, NONCE_SIZE};

/// The half of a crypt key held by the key server. Useless without a client half.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerHalf {
    #[serde(with = "b64_array")]
    bytes: [u8; KEY_SIZE],
}

impl ServerHalf {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ServerHalf {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for ServerHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHalf")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The half of a crypt key held (encrypted) by each device: `server_half XOR crypt_key`.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientHalf {
    bytes: [u8; KEY_SIZE],
}

impl ClientHalf {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ClientHalf {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for ClientHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHalf")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Box construction used for an [`EncryptedClientHalf`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum EncryptionVersion {
    /// X25519 + XChaCha20-Poly1305 (`crypto_box::ChaChaBox`)
    V1,
}

impl From<EncryptionVersion> for u32 {
    fn from(v: EncryptionVersion) -> u32 {
        match v {
            EncryptionVersion::V1 => 1,
        }
    }
}

impl TryFrom<u32> for EncryptionVersion {
    type Error = CryptoError;

    fn try_from(v: u32) -> CryptoResult<Self> {
        match v {
            1 => Ok(EncryptionVersion::V1),
            other => Err(CryptoError::UnsupportedVersion(other)),
        }
    }
}

/// A client half sealed to one device's public key under an ephemeral private key.
///
/// Wire format (JSON): `{ "version": 1, "nonce": b64(24), "encrypted_data": b64(32 + 16) }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedClientHalf {
    pub version: EncryptionVersion,
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64_vec")]
    pub encrypted_data: Vec<u8>,
}

/// Identifier under which the key server stores a [`ServerHalf`].
///
/// A keyed hash, safe to log and to use as a lookup key; never secret material.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerHalfId([u8; KEY_SIZE]);

impl ServerHalfId {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for ServerHalfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ServerHalfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerHalfId({self})")
    }
}

impl FromStr for ServerHalfId {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| CryptoError::Encoding(format!("server half id: {e}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ServerHalfId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ServerHalfId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn xor(a: &[u8; KEY_SIZE], b: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut out = [0u8; KEY_SIZE];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

/// Split a crypt key: `client_half = server_half XOR crypt_key`.
pub fn mask_crypt_key(server_half: &ServerHalf, crypt_key: &TlfCryptKey) -> ClientHalf {
    ClientHalf::from_bytes(xor(server_half.as_bytes(), crypt_key.as_bytes()))
}

/// Recombine both halves: `crypt_key = server_half XOR client_half`.
pub fn unmask_crypt_key(server_half: &ServerHalf, client_half: &ClientHalf) -> TlfCryptKey {
    TlfCryptKey::from_bytes(xor(server_half.as_bytes(), client_half.as_bytes()))
}

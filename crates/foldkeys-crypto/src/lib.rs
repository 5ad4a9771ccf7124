//! foldkeys-crypto: the crypto capability consumed by folder key bundles
//!
//! Split-key scheme for a folder's symmetric secret (`TlfCryptKey`):
//! ```text
//! ServerHalf (random, 256-bit)   --stored by-->  key server, under ServerHalfId
//! ClientHalf = ServerHalf XOR TlfCryptKey
//!   └── EncryptedClientHalf: X25519(ephemeral_priv, device_pub) + XChaCha20-Poly1305
//! ServerHalfId = BLAKE3-keyed(ServerHalf, domain || user || device)
//! TlfCryptKey = ServerHalf XOR ClientHalf
//! ```
//!
//! Neither half alone reveals anything about the folder key.

pub mod encoding;
pub mod error;
pub mod halves;
pub mod keys;
pub mod provider;

pub use error::{CryptoError, CryptoResult};
pub use halves::{
    mask_crypt_key, unmask_crypt_key, ClientHalf, EncryptedClientHalf, EncryptionVersion,
    ServerHalf, ServerHalfId,
};
pub use keys::{
    CryptPrivateKey, CryptPublicKey, DeviceId, TlfCryptKey, TlfEphemeralPrivateKey,
    TlfEphemeralPublicKey, TlfPrivateKey, TlfPublicKey,
};
pub use provider::{Crypto, StandardCrypto};

/// Size of every symmetric key and key half in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a device key identifier
pub const DEVICE_ID_SIZE: usize = 8;

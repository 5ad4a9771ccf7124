//! The crypto capability consumed by key bundles, and its production implementation.

use crypto_box::aead::Aead;
use crypto_box::ChaChaBox;
use foldkeys_core::UserId;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::halves::{
    mask_crypt_key, unmask_crypt_key, ClientHalf, EncryptedClientHalf, EncryptionVersion,
    ServerHalf, ServerHalfId,
};
use crate::keys::{
    CryptPrivateKey, CryptPublicKey, DeviceId, TlfCryptKey, TlfEphemeralPrivateKey,
    TlfEphemeralPublicKey, TlfPrivateKey, TlfPublicKey,
};
use crate::{KEY_SIZE, NONCE_SIZE};

/// Domain separator mixed into every server half id
const SERVER_HALF_ID_DOMAIN: &[u8] = b"foldkeys-server-half-id-v1";

/// Cryptographic operations needed to provision and recover folder keys.
///
/// Every operation is fallible; callers surface failures without retrying.
pub trait Crypto: Send + Sync {
    /// Generate a fresh random server half.
    fn make_random_server_half(&self) -> CryptoResult<ServerHalf>;

    /// `client_half = server_half XOR crypt_key`
    fn mask(&self, server_half: &ServerHalf, crypt_key: &TlfCryptKey) -> CryptoResult<ClientHalf>;

    /// `crypt_key = server_half XOR client_half`
    fn unmask(&self, server_half: &ServerHalf, client_half: &ClientHalf)
        -> CryptoResult<TlfCryptKey>;

    /// Seal a client half to `device` with the provisioning event's ephemeral private key.
    fn encrypt_client_half(
        &self,
        ephemeral_private_key: &TlfEphemeralPrivateKey,
        device: &CryptPublicKey,
        client_half: &ClientHalf,
    ) -> CryptoResult<EncryptedClientHalf>;

    /// Open a client half with the device's private key.
    fn decrypt_client_half(
        &self,
        ephemeral_public_key: &TlfEphemeralPublicKey,
        device_private_key: &CryptPrivateKey,
        encrypted: &EncryptedClientHalf,
    ) -> CryptoResult<ClientHalf>;

    /// Key-server lookup id for `server_half` as issued to `(user, device)`.
    fn server_half_id(
        &self,
        user: &UserId,
        device: &DeviceId,
        server_half: &ServerHalf,
    ) -> CryptoResult<ServerHalfId>;

    /// Check that `id` was issued for this server half and `(user, device)`.
    fn verify_server_half_id(
        &self,
        id: &ServerHalfId,
        user: &UserId,
        device: &DeviceId,
        server_half: &ServerHalf,
    ) -> CryptoResult<()> {
        let expected = self.server_half_id(user, device, server_half)?;
        // blake3::Hash equality is constant-time
        if blake3::Hash::from(*expected.as_bytes()) == blake3::Hash::from(*id.as_bytes()) {
            Ok(())
        } else {
            Err(CryptoError::ServerHalfIdMismatch)
        }
    }

    /// Fresh keys for a new folder generation.
    fn make_random_tlf_keys(&self) -> CryptoResult<(TlfPublicKey, TlfPrivateKey, TlfCryptKey)>;

    /// Fresh one-time key pair for a provisioning event.
    fn make_ephemeral_key_pair(
        &self,
    ) -> CryptoResult<(TlfEphemeralPublicKey, TlfEphemeralPrivateKey)>;
}

/// OS-RNG backed implementation: `crypto_box::ChaChaBox` for client halves,
/// BLAKE3 keyed hashing for server half ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCrypto;

impl StandardCrypto {
    pub fn new() -> Self {
        Self
    }

    /// Generate a new device key pair (enrollment helper).
    pub fn make_device_key_pair(&self) -> CryptoResult<(CryptPublicKey, CryptPrivateKey)> {
        let private = CryptPrivateKey::from_bytes(random_bytes()?);
        Ok((private.public_key(), private))
    }
}

fn random_bytes<const N: usize>() -> CryptoResult<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(bytes)
}

impl Crypto for StandardCrypto {
    fn make_random_server_half(&self) -> CryptoResult<ServerHalf> {
        random_bytes().map(ServerHalf::from_bytes)
    }

    fn mask(&self, server_half: &ServerHalf, crypt_key: &TlfCryptKey) -> CryptoResult<ClientHalf> {
        Ok(mask_crypt_key(server_half, crypt_key))
    }

    fn unmask(
        &self,
        server_half: &ServerHalf,
        client_half: &ClientHalf,
    ) -> CryptoResult<TlfCryptKey> {
        Ok(unmask_crypt_key(server_half, client_half))
    }

    fn encrypt_client_half(
        &self,
        ephemeral_private_key: &TlfEphemeralPrivateKey,
        device: &CryptPublicKey,
        client_half: &ClientHalf,
    ) -> CryptoResult<EncryptedClientHalf> {
        let cbox = ChaChaBox::new(&device.to_box_key(), &ephemeral_private_key.to_box_key());
        let nonce: [u8; NONCE_SIZE] = random_bytes()?;

        let encrypted_data = cbox
            .encrypt(
                crypto_box::Nonce::from_slice(&nonce),
                client_half.as_bytes().as_ref(),
            )
            .map_err(|e| CryptoError::Encryption(format!("client half seal failed: {e}")))?;

        Ok(EncryptedClientHalf {
            version: EncryptionVersion::V1,
            nonce,
            encrypted_data,
        })
    }

    fn decrypt_client_half(
        &self,
        ephemeral_public_key: &TlfEphemeralPublicKey,
        device_private_key: &CryptPrivateKey,
        encrypted: &EncryptedClientHalf,
    ) -> CryptoResult<ClientHalf> {
        match encrypted.version {
            EncryptionVersion::V1 => {}
        }

        let cbox = ChaChaBox::new(
            &ephemeral_public_key.to_box_key(),
            &device_private_key.to_box_key(),
        );
        let mut plaintext = cbox
            .decrypt(
                crypto_box::Nonce::from_slice(&encrypted.nonce),
                encrypted.encrypted_data.as_ref(),
            )
            .map_err(|_| {
                CryptoError::Decryption(
                    "client half open failed: wrong device key or tampered data".to_string(),
                )
            })?;

        if plaintext.len() != KEY_SIZE {
            let actual = plaintext.len();
            plaintext.zeroize();
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual,
            });
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(ClientHalf::from_bytes(bytes))
    }

    fn server_half_id(
        &self,
        user: &UserId,
        device: &DeviceId,
        server_half: &ServerHalf,
    ) -> CryptoResult<ServerHalfId> {
        let user_bytes = user.as_str().as_bytes();
        let mut hasher = blake3::Hasher::new_keyed(server_half.as_bytes());
        hasher.update(SERVER_HALF_ID_DOMAIN);
        hasher.update(&(user_bytes.len() as u64).to_be_bytes());
        hasher.update(user_bytes);
        hasher.update(device.as_bytes());
        Ok(ServerHalfId::from_bytes(*hasher.finalize().as_bytes()))
    }

    fn make_random_tlf_keys(&self) -> CryptoResult<(TlfPublicKey, TlfPrivateKey, TlfCryptKey)> {
        let private = TlfPrivateKey::from_bytes(random_bytes()?);
        let crypt_key = TlfCryptKey::from_bytes(random_bytes()?);
        Ok((private.public_key(), private, crypt_key))
    }

    fn make_ephemeral_key_pair(
        &self,
    ) -> CryptoResult<(TlfEphemeralPublicKey, TlfEphemeralPrivateKey)> {
        let private = TlfEphemeralPrivateKey::from_bytes(random_bytes()?);
        Ok((private.public_key(), private))
    }
}

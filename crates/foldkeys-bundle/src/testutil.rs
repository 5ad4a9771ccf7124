//! Crypto stub with failure injection for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use foldkeys_core::UserId;
use foldkeys_crypto::{
    ClientHalf, Crypto, CryptoError, CryptoResult, CryptPrivateKey, CryptPublicKey, DeviceId,
    EncryptedClientHalf, ServerHalf, ServerHalfId, StandardCrypto, TlfCryptKey,
    TlfEphemeralPrivateKey, TlfEphemeralPublicKey, TlfPrivateKey, TlfPublicKey,
};

#[derive(Default)]
pub(crate) struct FlakyCrypto {
    inner: StandardCrypto,
    /// Fail encryption for this device only
    pub fail_encrypt_for: Option<DeviceId>,
    /// Fail every server half request after this many successful ones
    pub fail_random_after: Option<usize>,
    random_calls: AtomicUsize,
}

impl FlakyCrypto {
    pub fn failing_encrypt_for(device: DeviceId) -> Self {
        Self {
            fail_encrypt_for: Some(device),
            ..Self::default()
        }
    }

    pub fn failing_random_after(n: usize) -> Self {
        Self {
            fail_random_after: Some(n),
            ..Self::default()
        }
    }
}

impl Crypto for FlakyCrypto {
    fn make_random_server_half(&self) -> CryptoResult<ServerHalf> {
        let n = self.random_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_random_after.is_some_and(|limit| n >= limit) {
            return Err(CryptoError::Random("entropy source unavailable".into()));
        }
        self.inner.make_random_server_half()
    }

    fn mask(&self, server_half: &ServerHalf, crypt_key: &TlfCryptKey) -> CryptoResult<ClientHalf> {
        self.inner.mask(server_half, crypt_key)
    }

    fn unmask(
        &self,
        server_half: &ServerHalf,
        client_half: &ClientHalf,
    ) -> CryptoResult<TlfCryptKey> {
        self.inner.unmask(server_half, client_half)
    }

    fn encrypt_client_half(
        &self,
        ephemeral_private_key: &TlfEphemeralPrivateKey,
        device: &CryptPublicKey,
        client_half: &ClientHalf,
    ) -> CryptoResult<EncryptedClientHalf> {
        if self.fail_encrypt_for == Some(device.kid()) {
            return Err(CryptoError::Encryption("injected failure".into()));
        }
        self.inner
            .encrypt_client_half(ephemeral_private_key, device, client_half)
    }

    fn decrypt_client_half(
        &self,
        ephemeral_public_key: &TlfEphemeralPublicKey,
        device_private_key: &CryptPrivateKey,
        encrypted: &EncryptedClientHalf,
    ) -> CryptoResult<ClientHalf> {
        self.inner
            .decrypt_client_half(ephemeral_public_key, device_private_key, encrypted)
    }

    fn server_half_id(
        &self,
        user: &UserId,
        device: &DeviceId,
        server_half: &ServerHalf,
    ) -> CryptoResult<ServerHalfId> {
        self.inner.server_half_id(user, device, server_half)
    }

    fn make_random_tlf_keys(&self) -> CryptoResult<(TlfPublicKey, TlfPrivateKey, TlfCryptKey)> {
        self.inner.make_random_tlf_keys()
    }

    fn make_ephemeral_key_pair(
        &self,
    ) -> CryptoResult<(TlfEphemeralPublicKey, TlfEphemeralPrivateKey)> {
        self.inner.make_ephemeral_key_pair()
    }
}

/// `n` fresh device key pairs
pub(crate) fn devices(n: usize) -> Vec<(CryptPublicKey, CryptPrivateKey)> {
    (0..n)
        .map(|_| StandardCrypto.make_device_key_pair().unwrap())
        .collect()
}

pub(crate) fn public_keys(devices: &[(CryptPublicKey, CryptPrivateKey)]) -> Vec<CryptPublicKey> {
    devices.iter().map(|(public, _)| *public).collect()
}

//! Per-user device key bundle and the per-device provisioning routine.

use std::collections::{BTreeMap, BTreeSet};

use foldkeys_core::UserId;
use foldkeys_crypto::{
    Crypto, CryptoError, CryptPublicKey, DeviceId, ServerHalf, TlfCryptKey,
    TlfEphemeralPrivateKey,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BundleError, BundleResult};
use crate::info::TlfCryptKeyInfo;

/// How a provisioning call computes key material for new devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillStrategy {
    /// One device after another on the calling thread
    #[default]
    Sequential,
    /// Per-device work on the rayon pool, merged on the calling thread
    Parallel,
}

/// Map from a user's devices (by key id) to their key entries for one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserCryptKeyBundle(BTreeMap<DeviceId, TlfCryptKeyInfo>);

impl UserCryptKeyBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device: &DeviceId) -> Option<&TlfCryptKeyInfo> {
        self.0.get(device)
    }

    pub fn contains(&self, device: &DeviceId) -> bool {
        self.0.contains_key(device)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &TlfCryptKeyInfo)> {
        self.0.iter()
    }

    /// Key ids of every device in this bundle.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.0.keys().copied().collect()
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, device: DeviceId, info: TlfCryptKeyInfo) {
        self.0.insert(device, info);
    }

    /// Give every device in `public_keys` that has no entry yet a fresh key entry.
    ///
    /// For each new device: random server half, client half = mask(server half,
    /// crypt key), client half sealed to the device under `ephemeral_private_key`,
    /// server half id bound to `(user, device)`. Existing entries are never touched.
    ///
    /// Returns the server halves of the newly provisioned devices only. A crypto
    /// failure aborts the call; entries inserted before the failure stay.
    pub fn fill_in_device_info<C: Crypto + ?Sized>(
        &mut self,
        crypto: &C,
        user: &UserId,
        crypt_key: &TlfCryptKey,
        ephemeral_private_key: &TlfEphemeralPrivateKey,
        ephemeral_key_index: usize,
        public_keys: &[CryptPublicKey],
    ) -> BundleResult<BTreeMap<DeviceId, ServerHalf>> {
        let mut server_map = BTreeMap::new();

        for key in public_keys {
            if self.0.contains_key(&key.kid()) {
                continue;
            }

            let (info, server_half) = provision_device(
                crypto,
                user,
                crypt_key,
                ephemeral_private_key,
                ephemeral_key_index,
                key,
            )?;

            debug!(%user, device = %key.kid(), ephemeral_key_index, "provisioned device");
            self.0.insert(key.kid(), info);
            server_map.insert(key.kid(), server_half);
        }

        Ok(server_map)
    }

    /// Parallel variant of [`fill_in_device_info`](Self::fill_in_device_info).
    ///
    /// Key material is computed on the rayon pool as an immutable delta, then merged
    /// in `public_keys` order. On failure the devices ordered before the first failing
    /// one are merged, so the bundle ends up exactly as the sequential call leaves it.
    pub fn fill_in_device_info_par<C: Crypto + ?Sized>(
        &mut self,
        crypto: &C,
        user: &UserId,
        crypt_key: &TlfCryptKey,
        ephemeral_private_key: &TlfEphemeralPrivateKey,
        ephemeral_key_index: usize,
        public_keys: &[CryptPublicKey],
    ) -> BundleResult<BTreeMap<DeviceId, ServerHalf>> {
        let mut seen = BTreeSet::new();
        let pending: Vec<&CryptPublicKey> = public_keys
            .iter()
            .filter(|k| !self.0.contains_key(&k.kid()) && seen.insert(k.kid()))
            .collect();

        let delta: Vec<BundleResult<(TlfCryptKeyInfo, ServerHalf)>> = pending
            .par_iter()
            .map(|key| {
                provision_device(
                    crypto,
                    user,
                    crypt_key,
                    ephemeral_private_key,
                    ephemeral_key_index,
                    key,
                )
            })
            .collect();

        let mut server_map = BTreeMap::new();
        for (key, result) in pending.iter().zip(delta) {
            let (info, server_half) = result?;
            debug!(%user, device = %key.kid(), ephemeral_key_index, "provisioned device");
            self.0.insert(key.kid(), info);
            server_map.insert(key.kid(), server_half);
        }

        Ok(server_map)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn fill_in_with<C: Crypto + ?Sized>(
        &mut self,
        strategy: FillStrategy,
        crypto: &C,
        user: &UserId,
        crypt_key: &TlfCryptKey,
        ephemeral_private_key: &TlfEphemeralPrivateKey,
        ephemeral_key_index: usize,
        public_keys: &[CryptPublicKey],
    ) -> BundleResult<BTreeMap<DeviceId, ServerHalf>> {
        match strategy {
            FillStrategy::Sequential => self.fill_in_device_info(
                crypto,
                user,
                crypt_key,
                ephemeral_private_key,
                ephemeral_key_index,
                public_keys,
            ),
            FillStrategy::Parallel => self.fill_in_device_info_par(
                crypto,
                user,
                crypt_key,
                ephemeral_private_key,
                ephemeral_key_index,
                public_keys,
            ),
        }
    }
}

/// Key material for one new device. Touches nothing but its own outputs.
fn provision_device<C: Crypto + ?Sized>(
    crypto: &C,
    user: &UserId,
    crypt_key: &TlfCryptKey,
    ephemeral_private_key: &TlfEphemeralPrivateKey,
    ephemeral_key_index: usize,
    key: &CryptPublicKey,
) -> BundleResult<(TlfCryptKeyInfo, ServerHalf)> {
    let device = key.kid();
    let wrap = |source: CryptoError| BundleError::Provision {
        user: user.clone(),
        device,
        source,
    };

    let server_half = crypto.make_random_server_half().map_err(wrap)?;
    let client_half = crypto.mask(&server_half, crypt_key).map_err(wrap)?;
    let encrypted = crypto
        .encrypt_client_half(ephemeral_private_key, key, &client_half)
        .map_err(wrap)?;
    let server_half_id = crypto
        .server_half_id(user, &device, &server_half)
        .map_err(wrap)?;

    Ok((
        TlfCryptKeyInfo {
            client_half: encrypted,
            server_half_id,
            ephemeral_key_index,
        },
        server_half,
    ))
}

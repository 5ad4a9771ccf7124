//! Recovering a generation's crypt key on an authorized device.

use foldkeys_core::{KeyGen, UserId};
use foldkeys_crypto::{Crypto, CryptPrivateKey, TlfCryptKey};
use tracing::debug;

use crate::bundle::TlfKeyBundle;
use crate::error::{BundleError, BundleResult};
use crate::generations::FolderKeyGenerations;
use crate::keyserver::KeyServer;

/// Rebuild the crypt key of `bundle` from `device_key`'s entry and its server half.
///
/// Fails with [`BundleError::NotAuthorized`] when the device holds no entry, and
/// with [`BundleError::ServerHalfNotFound`] when the key server lacks the half.
pub fn recover_crypt_key<C, K>(
    crypto: &C,
    key_server: &K,
    bundle: &TlfKeyBundle,
    user: &UserId,
    device_key: &CryptPrivateKey,
) -> BundleResult<TlfCryptKey>
where
    C: Crypto + ?Sized,
    K: KeyServer + ?Sized,
{
    let public = device_key.public_key();
    let device = public.kid();

    let info = bundle
        .get_crypt_key_info(user, &public)
        .ok_or_else(|| BundleError::NotAuthorized {
            user: user.clone(),
            device,
        })?;
    let ephemeral_public_key = bundle.get_ephemeral_public_key(user, &public)?;

    let client_half =
        crypto.decrypt_client_half(&ephemeral_public_key, device_key, &info.client_half)?;
    let server_half = key_server
        .get_server_half(&info.server_half_id)?
        .ok_or(BundleError::ServerHalfNotFound(info.server_half_id))?;
    crypto.verify_server_half_id(&info.server_half_id, user, &device, &server_half)?;

    debug!(%user, %device, server_half_id = %info.server_half_id, "recovered crypt key");
    Ok(crypto.unmask(&server_half, &client_half)?)
}

/// [`recover_crypt_key`] against generation `generation` of a folder history.
pub fn recover_generation_key<C, K>(
    crypto: &C,
    key_server: &K,
    history: &FolderKeyGenerations,
    generation: KeyGen,
    user: &UserId,
    device_key: &CryptPrivateKey,
) -> BundleResult<TlfCryptKey>
where
    C: Crypto + ?Sized,
    K: KeyServer + ?Sized,
{
    let current = history.current_generation();
    if current == 0 {
        return Err(BundleError::NoGenerations);
    }
    let bundle = history
        .get(generation)
        .ok_or(BundleError::UnknownGeneration {
            generation,
            current,
        })?;
    recover_crypt_key(crypto, key_server, bundle, user, device_key)
}

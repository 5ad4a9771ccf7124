use foldkeys_core::{KeyGen, UserId};
use foldkeys_crypto::{CryptoError, DeviceId, ServerHalfId};
use thiserror::Error;

pub type BundleResult<T> = Result<T, BundleError>;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("provisioning device {device} of {user}: {source}")]
    Provision {
        user: UserId,
        device: DeviceId,
        source: CryptoError,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("no ephemeral public key for device {device} of {user}")]
    EphemeralPublicKeyNotFound { user: UserId, device: DeviceId },

    #[error("corrupt key bundle: ephemeral key index {index} out of range ({len} keys)")]
    CorruptBundle { index: usize, len: usize },

    #[error("folder has no key generations")]
    NoGenerations,

    #[error("unknown key generation {generation} (current generation: {current})")]
    UnknownGeneration { generation: KeyGen, current: KeyGen },

    #[error("device {device} of {user} holds no key for this generation")]
    NotAuthorized { user: UserId, device: DeviceId },

    #[error("server half {0} not found on key server")]
    ServerHalfNotFound(ServerHalfId),

    #[error("key server already holds a different server half under {0}")]
    ServerHalfConflict(ServerHalfId),
}

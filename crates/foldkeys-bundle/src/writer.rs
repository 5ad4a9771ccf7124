use std::collections::BTreeMap;

use foldkeys_core::UserId;
use foldkeys_crypto::{DeviceId, TlfEphemeralPublicKey, TlfPublicKey};
use serde::{Deserialize, Serialize};

use crate::user::UserCryptKeyBundle;

/// Map from each member of one permission level to their device key bundle
pub type TlfKeyMap = BTreeMap<UserId, UserCryptKeyBundle>;

/// Ephemeral public keys of a generation, one per provisioning event.
///
/// Append-only: an index handed out by [`push`](Self::push) stays valid and is never
/// reassigned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TlfEphemeralPublicKeys(Vec<TlfEphemeralPublicKey>);

impl TlfEphemeralPublicKeys {
    /// Append a key and return its index.
    pub fn push(&mut self, key: TlfEphemeralPublicKey) -> usize {
        self.0.push(key);
        self.0.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&TlfEphemeralPublicKey> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TlfEphemeralPublicKey> {
        self.0.iter()
    }
}

/// Writer half of a key generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlfWriterKeyBundle {
    writer_keys: TlfKeyMap,
    /// Folder public key, fixed when the generation is created
    tlf_public_key: TlfPublicKey,
    // Devices can be added to a generation after it is created, so every
    // provisioning event appends its own ephemeral key; a device's entry
    // records which one it was sealed under.
    ephemeral_public_keys: TlfEphemeralPublicKeys,
}

impl TlfWriterKeyBundle {
    pub fn new(tlf_public_key: TlfPublicKey) -> Self {
        Self {
            writer_keys: TlfKeyMap::new(),
            tlf_public_key,
            ephemeral_public_keys: TlfEphemeralPublicKeys::default(),
        }
    }

    pub fn tlf_public_key(&self) -> &TlfPublicKey {
        &self.tlf_public_key
    }

    pub fn writer_keys(&self) -> &TlfKeyMap {
        &self.writer_keys
    }

    pub fn ephemeral_public_keys(&self) -> &TlfEphemeralPublicKeys {
        &self.ephemeral_public_keys
    }

    pub fn user_bundle(&self, user: &UserId) -> Option<&UserCryptKeyBundle> {
        self.writer_keys.get(user)
    }

    /// Whether `device` of `user` holds a writer key entry.
    pub fn is_writer(&self, user: &UserId, device: &DeviceId) -> bool {
        self.writer_keys
            .get(user)
            .is_some_and(|bundle| bundle.contains(device))
    }

    pub(crate) fn writer_keys_mut(&mut self) -> &mut TlfKeyMap {
        &mut self.writer_keys
    }

    pub(crate) fn ephemeral_public_keys_mut(&mut self) -> &mut TlfEphemeralPublicKeys {
        &mut self.ephemeral_public_keys
    }
}

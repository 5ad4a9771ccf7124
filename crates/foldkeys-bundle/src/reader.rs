use foldkeys_core::UserId;
use foldkeys_crypto::DeviceId;
use serde::{Deserialize, Serialize};

use crate::user::UserCryptKeyBundle;
use crate::writer::TlfKeyMap;

/// Reader half of a key generation.
///
/// Holds no ephemeral keys of its own: reader entries index into the writer
/// bundle's list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlfReaderKeyBundle {
    reader_keys: TlfKeyMap,
}

impl TlfReaderKeyBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader_keys(&self) -> &TlfKeyMap {
        &self.reader_keys
    }

    pub fn user_bundle(&self, user: &UserId) -> Option<&UserCryptKeyBundle> {
        self.reader_keys.get(user)
    }

    /// Whether `device` of `user` holds a reader key entry.
    pub fn is_reader(&self, user: &UserId, device: &DeviceId) -> bool {
        self.reader_keys
            .get(user)
            .is_some_and(|bundle| bundle.contains(device))
    }

    pub(crate) fn reader_keys_mut(&mut self) -> &mut TlfKeyMap {
        &mut self.reader_keys
    }
}

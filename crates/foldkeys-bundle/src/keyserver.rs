//! Key server boundary: where server halves live, addressed by [`ServerHalfId`].

use std::collections::BTreeMap;

use foldkeys_crypto::{Crypto, ServerHalf, ServerHalfId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bundle::ServerKeyMap;
use crate::error::{BundleError, BundleResult};

/// Storage for server halves.
pub trait KeyServer {
    /// Store `half` under `id`. Storing the same half twice is a no-op; a different
    /// half under an existing id is a [`BundleError::ServerHalfConflict`].
    fn put_server_half(&mut self, id: ServerHalfId, half: ServerHalf) -> BundleResult<()>;

    fn get_server_half(&self, id: &ServerHalfId) -> BundleResult<Option<ServerHalf>>;
}

/// In-memory key server. Serializable so a single-machine setup can keep it in a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryKeyServer(BTreeMap<ServerHalfId, ServerHalf>);

impl MemoryKeyServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl KeyServer for MemoryKeyServer {
    fn put_server_half(&mut self, id: ServerHalfId, half: ServerHalf) -> BundleResult<()> {
        match self.0.get(&id) {
            Some(existing) if existing == &half => Ok(()),
            Some(_) => Err(BundleError::ServerHalfConflict(id)),
            None => {
                self.0.insert(id, half);
                Ok(())
            }
        }
    }

    fn get_server_half(&self, id: &ServerHalfId) -> BundleResult<Option<ServerHalf>> {
        Ok(self.0.get(id).cloned())
    }
}

/// Store every server half from a provisioning call, returning how many were stored.
pub fn register_server_halves<C, K>(
    crypto: &C,
    key_server: &mut K,
    server_keys: &ServerKeyMap,
) -> BundleResult<usize>
where
    C: Crypto + ?Sized,
    K: KeyServer + ?Sized,
{
    let mut count = 0;
    for (user, devices) in server_keys {
        for (device, half) in devices {
            let id = crypto.server_half_id(user, device, half)?;
            debug!(%user, %device, server_half_id = %id, "registering server half");
            key_server.put_server_half(id, half.clone())?;
            count += 1;
        }
    }
    Ok(count)
}

use foldkeys_crypto::{EncryptedClientHalf, ServerHalfId};
use serde::{Deserialize, Serialize};

/// Per-device key entry of a key generation.
///
/// Created once when the device is provisioned and never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlfCryptKeyInfo {
    /// Client half sealed to the device's public key
    pub client_half: EncryptedClientHalf,
    /// Key-server id of the matching server half
    pub server_half_id: ServerHalfId,
    /// Index into the writer bundle's ephemeral public keys
    #[serde(default)]
    pub ephemeral_key_index: usize,
}

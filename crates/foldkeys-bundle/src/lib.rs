//! foldkeys-bundle: key material for a shared top-level folder (TLF)
//!
//! One folder owns an append-only list of key generations. Each generation is a
//! [`TlfKeyBundle`]:
//! ```text
//! TlfKeyBundle
//!   ├── writer: TlfWriterKeyBundle
//!   │     ├── writer_keys: user → device → TlfCryptKeyInfo
//!   │     ├── tlf_public_key
//!   │     └── ephemeral_public_keys: [E0, E1, ...]   (one per provisioning event)
//!   └── reader: TlfReaderKeyBundle
//!         └── reader_keys: user → device → TlfCryptKeyInfo
//! ```
//!
//! A device's `TlfCryptKeyInfo` holds its encrypted client half, the id of the
//! matching server half on the key server, and the index of the ephemeral public
//! key needed to open the client half. Reader records index into the writer
//! bundle's ephemeral key list.

pub mod bundle;
pub mod error;
pub mod generations;
pub mod info;
pub mod keyserver;
pub mod reader;
pub mod recovery;
pub mod user;
pub mod writer;

#[cfg(test)]
pub(crate) mod testutil;

pub use bundle::{DeviceKeyMap, ServerKeyMap, TlfKeyBundle};
pub use error::{BundleError, BundleResult};
pub use generations::{
    FolderKeyGenerations, KeyGenerations, Membership, ReaderKeyGenerations, WriterKeyGenerations,
};
pub use info::TlfCryptKeyInfo;
pub use keyserver::{register_server_halves, KeyServer, MemoryKeyServer};
pub use reader::TlfReaderKeyBundle;
pub use recovery::{recover_crypt_key, recover_generation_key};
pub use user::{FillStrategy, UserCryptKeyBundle};
pub use writer::{TlfEphemeralPublicKeys, TlfKeyMap, TlfWriterKeyBundle};

//! Append-only key generation history of a folder.

use foldkeys_core::{KeyGen, UserId};
use foldkeys_crypto::DeviceId;
use serde::{Deserialize, Serialize};

use crate::bundle::TlfKeyBundle;
use crate::reader::TlfReaderKeyBundle;
use crate::writer::TlfWriterKeyBundle;

/// Membership test answered by a single generation bundle.
pub trait Membership {
    fn is_writer(&self, user: &UserId, device: &DeviceId) -> bool;
    fn is_reader(&self, user: &UserId, device: &DeviceId) -> bool;
}

impl Membership for TlfWriterKeyBundle {
    fn is_writer(&self, user: &UserId, device: &DeviceId) -> bool {
        TlfWriterKeyBundle::is_writer(self, user, device)
    }

    fn is_reader(&self, _user: &UserId, _device: &DeviceId) -> bool {
        false
    }
}

impl Membership for TlfReaderKeyBundle {
    fn is_writer(&self, _user: &UserId, _device: &DeviceId) -> bool {
        false
    }

    fn is_reader(&self, user: &UserId, device: &DeviceId) -> bool {
        TlfReaderKeyBundle::is_reader(self, user, device)
    }
}

impl Membership for TlfKeyBundle {
    fn is_writer(&self, user: &UserId, device: &DeviceId) -> bool {
        TlfKeyBundle::is_writer(self, user, device)
    }

    fn is_reader(&self, user: &UserId, device: &DeviceId) -> bool {
        TlfKeyBundle::is_reader(self, user, device)
    }
}

/// Ordered generation bundles; generation `n` lives at index `n - 1`.
///
/// Only grows. Permission checks look at the latest generation; older ones stay
/// reachable through [`get`](Self::get) for recovering historical keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyGenerations<B>(Vec<B>);

pub type WriterKeyGenerations = KeyGenerations<TlfWriterKeyBundle>;
pub type ReaderKeyGenerations = KeyGenerations<TlfReaderKeyBundle>;
/// Full folder state: one `{ writer, reader }` pair per generation
pub type FolderKeyGenerations = KeyGenerations<TlfKeyBundle>;

impl<B> Default for KeyGenerations<B> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<B> KeyGenerations<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of generations ever created. 0 means none.
    pub fn current_generation(&self) -> KeyGen {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a bundle and return its generation number.
    pub fn push(&mut self, bundle: B) -> KeyGen {
        self.0.push(bundle);
        self.0.len()
    }

    pub fn latest(&self) -> Option<&B> {
        self.0.last()
    }

    /// The latest bundle, for provisioning new devices into the current generation.
    pub fn latest_mut(&mut self) -> Option<&mut B> {
        self.0.last_mut()
    }

    /// Bundle of generation `generation` (1-based).
    pub fn get(&self, generation: KeyGen) -> Option<&B> {
        generation.checked_sub(1).and_then(|i| self.0.get(i))
    }

    /// `(generation, bundle)` pairs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (KeyGen, &B)> {
        self.0.iter().enumerate().map(|(i, b)| (i + 1, b))
    }
}

impl<B: Membership> KeyGenerations<B> {
    /// Writer check against the latest generation; false when there is none.
    pub fn is_writer(&self, user: &UserId, device: &DeviceId) -> bool {
        self.latest().is_some_and(|b| b.is_writer(user, device))
    }

    /// Reader check against the latest generation; false when there is none.
    pub fn is_reader(&self, user: &UserId, device: &DeviceId) -> bool {
        self.latest().is_some_and(|b| b.is_reader(user, device))
    }
}

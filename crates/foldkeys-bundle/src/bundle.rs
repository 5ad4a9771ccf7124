//! Combined writer/reader key bundle of one generation.

use std::collections::BTreeMap;

use foldkeys_core::UserId;
use foldkeys_crypto::{
    Crypto, CryptPublicKey, DeviceId, ServerHalf, TlfCryptKey, TlfEphemeralPrivateKey,
    TlfEphemeralPublicKey, TlfPublicKey,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{BundleError, BundleResult};
use crate::info::TlfCryptKeyInfo;
use crate::reader::TlfReaderKeyBundle;
use crate::user::{FillStrategy, UserCryptKeyBundle};
use crate::writer::{TlfKeyMap, TlfWriterKeyBundle};

/// Server halves minted by one provisioning call, by user then device.
///
/// The caller persists these to the key server; they are never stored in a bundle.
pub type ServerKeyMap = BTreeMap<UserId, BTreeMap<DeviceId, ServerHalf>>;

/// Device public keys to provision, by user
pub type DeviceKeyMap = BTreeMap<UserId, Vec<CryptPublicKey>>;

/// Full access-control and key state of a single generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlfKeyBundle {
    writer: TlfWriterKeyBundle,
    reader: TlfReaderKeyBundle,
}

impl TlfKeyBundle {
    /// Empty generation for a freshly generated folder key pair.
    pub fn new(tlf_public_key: TlfPublicKey) -> Self {
        Self {
            writer: TlfWriterKeyBundle::new(tlf_public_key),
            reader: TlfReaderKeyBundle::new(),
        }
    }

    pub fn writer(&self) -> &TlfWriterKeyBundle {
        &self.writer
    }

    pub fn reader(&self) -> &TlfReaderKeyBundle {
        &self.reader
    }

    pub fn tlf_public_key(&self) -> &TlfPublicKey {
        self.writer.tlf_public_key()
    }

    /// Users holding writer entries
    pub fn writers(&self) -> impl Iterator<Item = &UserId> {
        self.writer.writer_keys().keys()
    }

    /// Users holding reader entries
    pub fn readers(&self) -> impl Iterator<Item = &UserId> {
        self.reader.reader_keys().keys()
    }

    /// Record one provisioning event: grant every listed device that lacks an entry
    /// its share of `crypt_key`.
    ///
    /// `ephemeral_public_key` is appended to the writer bundle's list whether or not
    /// any device is new; writers and then readers are provisioned under its index.
    /// Returns the server halves of newly provisioned devices only, omitting users
    /// with none. A device listed as both writer and reader gets the writer half,
    /// matching the entry that lookups answer from.
    ///
    /// The first crypto failure is returned as is. The appended ephemeral key and any
    /// entries written before the failure are kept.
    pub fn fill_in_devices<C: Crypto + ?Sized>(
        &mut self,
        crypto: &C,
        writer_device_keys: &DeviceKeyMap,
        reader_device_keys: &DeviceKeyMap,
        ephemeral_public_key: TlfEphemeralPublicKey,
        ephemeral_private_key: &TlfEphemeralPrivateKey,
        crypt_key: &TlfCryptKey,
    ) -> BundleResult<ServerKeyMap> {
        self.fill_in_with(
            FillStrategy::Sequential,
            crypto,
            writer_device_keys,
            reader_device_keys,
            ephemeral_public_key,
            ephemeral_private_key,
            crypt_key,
        )
    }

    /// [`fill_in_devices`](Self::fill_in_devices) with each user's devices provisioned
    /// on the rayon pool. Produces the same entries and leaves the same state on failure.
    pub fn fill_in_devices_par<C: Crypto + ?Sized>(
        &mut self,
        crypto: &C,
        writer_device_keys: &DeviceKeyMap,
        reader_device_keys: &DeviceKeyMap,
        ephemeral_public_key: TlfEphemeralPublicKey,
        ephemeral_private_key: &TlfEphemeralPrivateKey,
        crypt_key: &TlfCryptKey,
    ) -> BundleResult<ServerKeyMap> {
        self.fill_in_with(
            FillStrategy::Parallel,
            crypto,
            writer_device_keys,
            reader_device_keys,
            ephemeral_public_key,
            ephemeral_private_key,
            crypt_key,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_in_with<C: Crypto + ?Sized>(
        &mut self,
        strategy: FillStrategy,
        crypto: &C,
        writer_device_keys: &DeviceKeyMap,
        reader_device_keys: &DeviceKeyMap,
        ephemeral_public_key: TlfEphemeralPublicKey,
        ephemeral_private_key: &TlfEphemeralPrivateKey,
        crypt_key: &TlfCryptKey,
    ) -> BundleResult<ServerKeyMap> {
        let index = self
            .writer
            .ephemeral_public_keys_mut()
            .push(ephemeral_public_key);

        let mut server_keys = ServerKeyMap::new();
        let event = FillEvent {
            strategy,
            crypt_key,
            ephemeral_private_key,
            index,
        };

        let result = event
            .fill_map(crypto, writer_device_keys, self.writer.writer_keys_mut(), &mut server_keys)
            .and_then(|()| {
                event.fill_map(
                    crypto,
                    reader_device_keys,
                    self.reader.reader_keys_mut(),
                    &mut server_keys,
                )
            });

        if let Err(e) = result {
            warn!(
                ephemeral_key_index = index,
                error = %e,
                "provisioning aborted; bundle keeps devices provisioned before the failure"
            );
            return Err(e);
        }

        info!(
            ephemeral_key_index = index,
            users = server_keys.len(),
            devices = server_keys.values().map(BTreeMap::len).sum::<usize>(),
            ?strategy,
            "provisioned key generation devices"
        );
        Ok(server_keys)
    }

    /// Entry for `device` of `user`.
    ///
    /// A user with writer entries is answered from the writer map alone; the reader
    /// map is consulted only for users with no writer entries.
    pub fn get_crypt_key_info(
        &self,
        user: &UserId,
        device: &CryptPublicKey,
    ) -> Option<&TlfCryptKeyInfo> {
        self.user_bundle(user)?.get(&device.kid())
    }

    /// Ephemeral public key the entry for `device` of `user` was sealed under.
    pub fn get_ephemeral_public_key(
        &self,
        user: &UserId,
        device: &CryptPublicKey,
    ) -> BundleResult<TlfEphemeralPublicKey> {
        let info = self.get_crypt_key_info(user, device).ok_or_else(|| {
            BundleError::EphemeralPublicKeyNotFound {
                user: user.clone(),
                device: device.kid(),
            }
        })?;

        let keys = self.writer.ephemeral_public_keys();
        keys.get(info.ephemeral_key_index).copied().ok_or_else(|| {
            error!(
                %user,
                device = %device.kid(),
                index = info.ephemeral_key_index,
                len = keys.len(),
                "ephemeral key index out of range"
            );
            BundleError::CorruptBundle {
                index: info.ephemeral_key_index,
                len: keys.len(),
            }
        })
    }

    /// Device ids known for `user`, writer entries preferred over reader entries.
    pub fn get_crypt_public_keys(&self, user: &UserId) -> Option<Vec<DeviceId>> {
        self.user_bundle(user).map(UserCryptKeyBundle::device_ids)
    }

    pub fn is_writer(&self, user: &UserId, device: &DeviceId) -> bool {
        self.writer.is_writer(user, device)
    }

    pub fn is_reader(&self, user: &UserId, device: &DeviceId) -> bool {
        self.reader.is_reader(user, device)
    }

    fn user_bundle(&self, user: &UserId) -> Option<&UserCryptKeyBundle> {
        self.writer
            .user_bundle(user)
            .or_else(|| self.reader.user_bundle(user))
    }
}

/// Inputs shared by the writer and reader passes of one provisioning event
struct FillEvent<'a> {
    strategy: FillStrategy,
    crypt_key: &'a TlfCryptKey,
    ephemeral_private_key: &'a TlfEphemeralPrivateKey,
    index: usize,
}

impl FillEvent<'_> {
    fn fill_map<C: Crypto + ?Sized>(
        &self,
        crypto: &C,
        device_keys: &DeviceKeyMap,
        bundles: &mut TlfKeyMap,
        server_keys: &mut ServerKeyMap,
    ) -> BundleResult<()> {
        for (user, keys) in device_keys {
            let bundle = bundles.entry(user.clone()).or_default();
            let servers = bundle.fill_in_with(
                self.strategy,
                crypto,
                user,
                self.crypt_key,
                self.ephemeral_private_key,
                self.index,
                keys,
            )?;
            if servers.is_empty() {
                continue;
            }
            let user_servers = server_keys.entry(user.clone()).or_default();
            for (device, half) in servers {
                user_servers.entry(device).or_insert(half);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyserver::{register_server_halves, MemoryKeyServer};
    use crate::recovery::recover_crypt_key;
    use crate::testutil::{devices, public_keys, FlakyCrypto};
    use foldkeys_crypto::{CryptPrivateKey, StandardCrypto};

    struct Folder {
        bundle: TlfKeyBundle,
        crypt_key: TlfCryptKey,
    }

    fn folder() -> Folder {
        let (public, _, crypt_key) = StandardCrypto.make_random_tlf_keys().unwrap();
        Folder {
            bundle: TlfKeyBundle::new(public),
            crypt_key,
        }
    }

    fn provision(
        folder: &mut Folder,
        writers: &DeviceKeyMap,
        readers: &DeviceKeyMap,
    ) -> BundleResult<ServerKeyMap> {
        provision_event(folder, writers, readers).map(|(servers, _)| servers)
    }

    /// Like `provision`, also returning the event's ephemeral public key.
    fn provision_event(
        folder: &mut Folder,
        writers: &DeviceKeyMap,
        readers: &DeviceKeyMap,
    ) -> BundleResult<(ServerKeyMap, TlfEphemeralPublicKey)> {
        let (e_pub, e_priv) = StandardCrypto.make_ephemeral_key_pair().unwrap();
        let servers = folder.bundle.fill_in_devices(
            &StandardCrypto,
            writers,
            readers,
            e_pub,
            &e_priv,
            &folder.crypt_key,
        )?;
        Ok((servers, e_pub))
    }

    fn recover(
        bundle: &TlfKeyBundle,
        user: &UserId,
        device: &(CryptPublicKey, CryptPrivateKey),
        server_half: &ServerHalf,
    ) -> TlfCryptKey {
        let info = bundle.get_crypt_key_info(user, &device.0).unwrap();
        let e_pub = bundle.get_ephemeral_public_key(user, &device.0).unwrap();
        let client = StandardCrypto
            .decrypt_client_half(&e_pub, &device.1, &info.client_half)
            .unwrap();
        StandardCrypto.unmask(server_half, &client).unwrap()
    }

    #[test]
    fn test_two_provisioning_events() {
        let mut f = folder();
        let u1 = UserId::new("u1");
        let u2 = UserId::new("u2");
        let d1 = devices(1).pop().unwrap();
        let d2 = devices(1).pop().unwrap();

        let first = provision(
            &mut f,
            &BTreeMap::from([(u1.clone(), vec![d1.0])]),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(first.len(), 1);
        let s1 = &first[&u1][&d1.0.kid()];
        let info1 = f.bundle.get_crypt_key_info(&u1, &d1.0).unwrap().clone();
        assert_eq!(info1.ephemeral_key_index, 0);
        assert_eq!(recover(&f.bundle, &u1, &d1, s1), f.crypt_key);

        let second = provision(
            &mut f,
            &BTreeMap::from([(u1.clone(), vec![d1.0])]),
            &BTreeMap::from([(u2.clone(), vec![d2.0])]),
        )
        .unwrap();
        assert_eq!(second.keys().collect::<Vec<_>>(), vec![&u2]);
        assert_eq!(second[&u2].len(), 1);
        assert_eq!(f.bundle.get_crypt_key_info(&u1, &d1.0), Some(&info1));
        assert_eq!(
            f.bundle.get_crypt_key_info(&u2, &d2.0).unwrap().ephemeral_key_index,
            1
        );
        assert_eq!(f.bundle.writer().ephemeral_public_keys().len(), 2);
        assert_eq!(recover(&f.bundle, &u2, &d2, &second[&u2][&d2.0.kid()]), f.crypt_key);
    }

    #[test]
    fn test_writer_and_reader_isolation() {
        let mut f = folder();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let a = public_keys(&devices(1));
        let b = public_keys(&devices(1));

        let (_, e_pub) = provision_event(
            &mut f,
            &BTreeMap::from([(alice.clone(), a.clone())]),
            &BTreeMap::from([(bob.clone(), b.clone())]),
        )
        .unwrap();

        // one event: writer and reader entries share its ephemeral key
        assert_eq!(f.bundle.writer().ephemeral_public_keys().len(), 1);
        assert_eq!(f.bundle.get_ephemeral_public_key(&alice, &a[0]).unwrap(), e_pub);
        assert_eq!(f.bundle.get_ephemeral_public_key(&bob, &b[0]).unwrap(), e_pub);
        assert_eq!(
            f.bundle.get_crypt_key_info(&alice, &a[0]).unwrap().ephemeral_key_index,
            f.bundle.get_crypt_key_info(&bob, &b[0]).unwrap().ephemeral_key_index,
        );

        assert!(f.bundle.is_writer(&alice, &a[0].kid()));
        assert!(!f.bundle.is_reader(&alice, &a[0].kid()));
        assert!(f.bundle.is_reader(&bob, &b[0].kid()));
        assert!(!f.bundle.is_writer(&bob, &b[0].kid()));
        assert!(!f.bundle.is_writer(&alice, &b[0].kid()), "device of another user");
    }

    #[test]
    fn test_user_can_be_writer_and_reader() {
        let mut f = folder();
        let alice = UserId::new("alice");
        let device = devices(1).pop().unwrap();
        let map = BTreeMap::from([(alice.clone(), vec![device.0])]);

        let servers = provision(&mut f, &map, &map).unwrap();
        assert!(f.bundle.is_writer(&alice, &device.0.kid()));
        assert!(f.bundle.is_reader(&alice, &device.0.kid()));
        assert_eq!(servers[&alice].len(), 1);

        // the returned half must pair with the writer entry lookups answer from
        let mut ks = MemoryKeyServer::new();
        assert_eq!(register_server_halves(&StandardCrypto, &mut ks, &servers).unwrap(), 1);
        let recovered =
            recover_crypt_key(&StandardCrypto, &ks, &f.bundle, &alice, &device.1).unwrap();
        assert_eq!(recovered, f.crypt_key);
        assert_eq!(
            recover(&f.bundle, &alice, &device, &servers[&alice][&device.0.kid()]),
            f.crypt_key
        );
    }

    #[test]
    fn test_lookup_prefers_writer_entries_per_user() {
        let mut f = folder();
        let alice = UserId::new("alice");
        let devs = public_keys(&devices(2));

        provision(
            &mut f,
            &BTreeMap::from([(alice.clone(), vec![devs[0]])]),
            &BTreeMap::from([(alice.clone(), vec![devs[1]])]),
        )
        .unwrap();

        assert!(f.bundle.get_crypt_key_info(&alice, &devs[0]).is_some());
        assert!(
            f.bundle.get_crypt_key_info(&alice, &devs[1]).is_none(),
            "reader map not consulted for a user with writer entries"
        );
        assert_eq!(
            f.bundle.get_crypt_public_keys(&alice),
            Some(vec![devs[0].kid()])
        );
    }

    #[test]
    fn test_lookup_unknown_user() {
        let f = folder();
        let nobody = UserId::new("nobody");
        let dev = public_keys(&devices(1))[0];

        assert!(f.bundle.get_crypt_key_info(&nobody, &dev).is_none());
        assert!(f.bundle.get_crypt_public_keys(&nobody).is_none());
        assert!(matches!(
            f.bundle.get_ephemeral_public_key(&nobody, &dev),
            Err(BundleError::EphemeralPublicKeyNotFound { .. })
        ));
    }

    #[test]
    fn test_reader_only_user_lookups() {
        let mut f = folder();
        let bob = UserId::new("bob");
        let devs = public_keys(&devices(2));

        provision(&mut f, &BTreeMap::new(), &BTreeMap::from([(bob.clone(), devs.clone())])).unwrap();

        let mut expected: Vec<DeviceId> = devs.iter().map(CryptPublicKey::kid).collect();
        expected.sort();
        assert_eq!(f.bundle.get_crypt_public_keys(&bob), Some(expected));
        assert!(f.bundle.get_ephemeral_public_key(&bob, &devs[1]).is_ok());
    }

    #[test]
    fn test_empty_event_still_appends_ephemeral_key() {
        let mut f = folder();
        let servers = provision(&mut f, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        assert!(servers.is_empty());
        assert_eq!(f.bundle.writer().ephemeral_public_keys().len(), 1);
    }

    #[test]
    fn test_user_with_no_new_devices_omitted() {
        let mut f = folder();
        let alice = UserId::new("alice");
        let map = BTreeMap::from([(alice.clone(), public_keys(&devices(1)))]);
        provision(&mut f, &map, &BTreeMap::new()).unwrap();

        let again = provision(&mut f, &map, &BTreeMap::new()).unwrap();
        assert!(again.is_empty());
        assert!(!again.contains_key(&alice));
    }

    #[test]
    fn test_failure_keeps_ephemeral_key_and_earlier_entries() {
        let mut f = folder();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let a = public_keys(&devices(1));
        let b = public_keys(&devices(1));
        let crypto = FlakyCrypto::failing_encrypt_for(b[0].kid());
        let (e_pub, e_priv) = StandardCrypto.make_ephemeral_key_pair().unwrap();

        let err = f
            .bundle
            .fill_in_devices(
                &crypto,
                &BTreeMap::from([(alice.clone(), a.clone())]),
                &BTreeMap::from([(bob.clone(), b.clone())]),
                e_pub,
                &e_priv,
                &f.crypt_key,
            )
            .unwrap_err();

        assert!(matches!(err, BundleError::Provision { .. }));
        assert_eq!(f.bundle.writer().ephemeral_public_keys().len(), 1);
        assert!(f.bundle.is_writer(&alice, &a[0].kid()));
        assert!(!f.bundle.is_reader(&bob, &b[0].kid()));
        assert!(f.bundle.readers().any(|u| u == &bob), "empty reader bundle created");
    }

    #[test]
    fn test_corrupt_index_is_reported() {
        let mut f = folder();
        let alice = UserId::new("alice");
        let dev = devices(1).pop().unwrap();
        provision(&mut f, &BTreeMap::from([(alice.clone(), vec![dev.0])]), &BTreeMap::new())
            .unwrap();

        let mut info = f.bundle.get_crypt_key_info(&alice, &dev.0).unwrap().clone();
        info.ephemeral_key_index = 5;
        let mut tampered = UserCryptKeyBundle::new();
        tampered.insert_raw(dev.0.kid(), info);
        f.bundle.writer.writer_keys_mut().insert(alice.clone(), tampered);

        assert!(matches!(
            f.bundle.get_ephemeral_public_key(&alice, &dev.0),
            Err(BundleError::CorruptBundle { index: 5, len: 1 })
        ));
    }

    #[test]
    fn test_parallel_fill_matches_sequential() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let writers = BTreeMap::from([(alice.clone(), public_keys(&devices(10)))]);
        let readers = BTreeMap::from([(bob.clone(), public_keys(&devices(10)))]);
        let (e_pub, e_priv) = StandardCrypto.make_ephemeral_key_pair().unwrap();

        let mut seq = folder();
        let mut par = folder();
        let a = seq
            .bundle
            .fill_in_devices(&StandardCrypto, &writers, &readers, e_pub, &e_priv, &seq.crypt_key)
            .unwrap();
        let b = par
            .bundle
            .fill_in_devices_par(&StandardCrypto, &writers, &readers, e_pub, &e_priv, &par.crypt_key)
            .unwrap();

        let shape = |m: &ServerKeyMap| -> Vec<(UserId, Vec<DeviceId>)> {
            m.iter()
                .map(|(u, d)| (u.clone(), d.keys().copied().collect()))
                .collect()
        };
        assert_eq!(shape(&a), shape(&b));
        assert_eq!(
            seq.bundle.get_crypt_public_keys(&bob),
            par.bundle.get_crypt_public_keys(&bob)
        );
    }

    #[test]
    fn test_clone_is_independent() {
        let mut f = folder();
        let alice = UserId::new("alice");
        provision(
            &mut f,
            &BTreeMap::from([(alice.clone(), public_keys(&devices(1)))]),
            &BTreeMap::new(),
        )
        .unwrap();

        let copy = f.bundle.clone();
        let extra = public_keys(&devices(1));
        provision(&mut f, &BTreeMap::from([(alice.clone(), extra.clone())]), &BTreeMap::new())
            .unwrap();

        assert_eq!(copy.writer().ephemeral_public_keys().len(), 1);
        assert!(!copy.is_writer(&alice, &extra[0].kid()));
        assert!(f.bundle.is_writer(&alice, &extra[0].kid()));
    }

    #[test]
    fn test_json_shape() {
        let f = folder();
        let json = serde_json::to_value(&f.bundle).unwrap();
        assert!(json["writer"]["writer_keys"].is_object());
        assert!(json["reader"]["reader_keys"].is_object());
        let back: TlfKeyBundle = serde_json::from_value(json).unwrap();
        assert_eq!(back, f.bundle);
    }
}

//! JSON-file persistence for the CLI: folder history, key server, device
//! directory and device private keys.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

use foldkeys_crypto::encoding::{b64_decode_array, b64_encode};
use foldkeys_crypto::CryptPrivateKey;

/// Read a JSON document, or `T::default()` when the file does not exist yet.
pub async fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("checking {}", path.display()))?
    {
        tracing::debug!("{} not found, starting empty", path.display());
        return Ok(T::default());
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;
    atomic_replace(path, &content).await
}

/// Write through a sibling temp file and rename, so readers never see a partial file.
///
/// The temp file is created owner-only and never pre-exists, so the content is
/// never readable by others at any point.
pub async fn atomic_replace(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let tmp_path = temp_path(&parent, path);
    if let Err(e) = write_new(&tmp_path, content).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e)
            .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()));
    }

    tracing::debug!("wrote {}", path.display());
    Ok(())
}

/// Unique sibling temp name, so concurrent writers never share one.
fn temp_path(parent: &Path, path: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    parent.join(format!(
        ".{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed),
    ))
}

/// Create `path` owner-only, failing if it already exists.
async fn create_private(path: &Path) -> Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options
        .open(path)
        .await
        .with_context(|| format!("creating {}", path.display()))
}

/// Write `content` to a file that must not exist yet, flushed to disk.
async fn write_new(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = create_private(path).await?;
    file.write_all(content)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("syncing {}", path.display()))
}

/// Device private key file: one line of base64. Never replaces an existing file.
pub async fn create_device_key(path: &Path, key: &CryptPrivateKey) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let line = format!("{}\n", b64_encode(key.as_bytes()));
    match write_new(path, line.as_bytes()).await {
        Ok(()) => {
            tracing::debug!("wrote {}", path.display());
            Ok(())
        }
        Err(e) => {
            // a partial key we created is useless; an existing file is left alone
            if !is_already_exists(&e) {
                let _ = tokio::fs::remove_file(path).await;
            }
            Err(e)
        }
    }
}

fn is_already_exists(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::AlreadyExists)
}

pub async fn read_device_key(path: &Path) -> Result<CryptPrivateKey> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading device key {}", path.display()))?;
    let bytes = b64_decode_array(&content)
        .with_context(|| format!("decoding device key {}", path.display()))?;
    Ok(CryptPrivateKey::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use foldkeys_bundle::{DeviceKeyMap, MemoryKeyServer};
    use foldkeys_core::UserId;
    use foldkeys_crypto::StandardCrypto;

    #[tokio::test]
    async fn test_missing_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let ks: MemoryKeyServer = read_json_or_default(&dir.path().join("nope.json"))
            .await
            .unwrap();
        assert!(ks.is_empty());
    }

    #[tokio::test]
    async fn test_write_json_creates_parents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/directory.json");
        let (public, _) = StandardCrypto.make_device_key_pair().unwrap();
        let directory = DeviceKeyMap::from([(UserId::new("alice"), vec![public])]);

        write_json(&path, &directory).await.unwrap();
        let back: DeviceKeyMap = read_json_or_default(&path).await.unwrap();
        assert_eq!(back, directory);

        let names: Vec<String> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["directory.json".to_string()]);
    }

    #[tokio::test]
    async fn test_device_key_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("laptop.key");
        let (public, private) = StandardCrypto.make_device_key_pair().unwrap();

        create_device_key(&path, &private).await.unwrap();
        let loaded = read_device_key(&path).await.unwrap();
        assert_eq!(loaded.public_key(), public);
    }

    #[tokio::test]
    async fn test_corrupt_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyserver.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = read_json_or_default::<MemoryKeyServer>(&path)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("keyserver.json"));
    }

    #[tokio::test]
    async fn test_device_key_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("laptop.key");
        let (public, private) = StandardCrypto.make_device_key_pair().unwrap();
        let (_, other) = StandardCrypto.make_device_key_pair().unwrap();

        create_device_key(&path, &private).await.unwrap();
        let err = create_device_key(&path, &other).await.unwrap_err();
        assert!(is_already_exists(&err), "{err:#}");

        let loaded = read_device_key(&path).await.unwrap();
        assert_eq!(loaded.public_key(), public);
    }

    #[tokio::test]
    async fn test_replace_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyserver.json");

        atomic_replace(&path, b"first").await.unwrap();
        atomic_replace(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let dir = Path::new("/tmp/foldkeys");
        let path = dir.join("history.json");
        let a = temp_path(dir, &path);
        let b = temp_path(dir, &path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(dir));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_new_files_are_private_before_any_write() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".history.json.tmp");

        let file = create_private(&path).await.unwrap();
        let mode = file.metadata().await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(create_private(&path).await.is_err(), "existing file reused");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_written_files_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.key");
        let (_, private) = StandardCrypto.make_device_key_pair().unwrap();

        create_device_key(&path, &private).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let json = dir.path().join("keyserver.json");
        write_json(&json, &MemoryKeyServer::new()).await.unwrap();
        let mode = std::fs::metadata(&json).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

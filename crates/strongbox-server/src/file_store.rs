use std::fs::{self, File, OpenOptions};
use std::path::{Component, Path, PathBuf};

use strongbox_shared::ClientId;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StorageError;

const PROBE_NAME: &str = ".strongbox-write-probe";

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, StorageError> {
    // Target may not exist yet so normalize manually.
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let relative = target
        .strip_prefix(base)
        .or_else(|_| target.strip_prefix(&canonical_base))
        .map_err(|_| StorageError::PathTraversal)?;

    let mut resolved = canonical_base.clone();
    for component in relative.components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => return Err(StorageError::PathTraversal),
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(StorageError::PathTraversal);
    }
    Ok(resolved)
}

/// Reject names that could escape the client's directory.
pub fn validate_filename(filename: &str) -> Result<(), StorageError> {
    if filename.is_empty()
        || filename == "."
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
        || filename.contains('\0')
    {
        return Err(StorageError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

/// Received files on local disk, one directory per client.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create the root directory if needed and prove it is writable.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::NotWritable {
            path: root.clone(),
            source,
        })?;

        let probe = root.join(PROBE_NAME);
        fs::write(&probe, b"ok")
            .and_then(|()| fs::remove_file(&probe))
            .map_err(|source| StorageError::NotWritable {
                path: root.clone(),
                source,
            })?;

        info!(path = %root.display(), "File storage initialized");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pick a fresh path for `filename` under the client's directory.
    ///
    /// The object is named by a new UUID alone. The client's filename lives on
    /// the File row, so any name the 255-byte slot carries fits on disk.
    pub fn allocate(&self, client: &ClientId, filename: &str) -> Result<PathBuf, StorageError> {
        validate_filename(filename)?;

        let dir = self.client_dir(client);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let target = dir.join(Uuid::new_v4().to_string());
        ensure_within(&self.root, &target)
    }

    fn client_dir(&self, client: &ClientId) -> PathBuf {
        self.root.join(client.to_hex())
    }

    /// Create (or truncate) the file at a path handed out by [`allocate`](Self::allocate).
    pub fn create(&self, path: &Path) -> Result<File, StorageError> {
        let path = ensure_within(&self.root, path)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))
    }

    /// Delete stored bytes. A file that is already gone is not an error.
    pub fn remove(&self, path: &Path) -> Result<(), StorageError> {
        let path = ensure_within(&self.root, path)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed stored file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Delete every stored object of `client`. A missing directory is not an error.
    pub fn remove_client(&self, client: &ClientId) -> Result<(), StorageError> {
        let dir = ensure_within(&self.root, &self.client_dir(client))?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(path = %dir.display(), "Removed client directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_storage() -> (FileStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path().join("backups")).unwrap();
        (storage, dir)
    }

    #[test]
    fn test_open_creates_root_and_leaves_no_probe() {
        let (storage, _dir) = test_storage();
        assert!(storage.root().is_dir());
        assert!(!storage.root().join(PROBE_NAME).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_open_rejects_file_as_root() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        assert!(matches!(
            FileStorage::open(&blocker),
            Err(StorageError::NotWritable { .. })
        ));
    }

    #[test]
    fn test_allocate_is_unique_per_call() {
        let (storage, _dir) = test_storage();
        let client = ClientId::generate();

        let a = storage.allocate(&client, "report.pdf").unwrap();
        let b = storage.allocate(&client, "report.pdf").unwrap();
        assert_ne!(a, b);
        assert!(a.parent().unwrap().ends_with(client.to_hex()));
        let object = a.file_name().unwrap().to_string_lossy();
        assert!(Uuid::parse_str(&object).is_ok(), "unexpected object name {object}");
    }

    #[test]
    fn test_longest_slot_name_fits_on_disk() {
        let (storage, _dir) = test_storage();
        let client = ClientId::generate();
        let name = format!("{}.bin", "n".repeat(250));
        assert_eq!(name.len(), 254);

        let path = storage.allocate(&client, &name).unwrap();
        storage.create(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_remove_client_drops_directory() {
        let (storage, _dir) = test_storage();
        let client = ClientId::generate();
        let path = storage.allocate(&client, "a.txt").unwrap();
        storage.create(&path).unwrap();

        storage.remove_client(&client).unwrap();
        assert!(!path.exists());
        assert!(!storage.root().join(client.to_hex()).exists());
        // already gone
        storage.remove_client(&client).unwrap();
    }

    #[test]
    fn test_traversal_names_rejected() {
        let (storage, _dir) = test_storage();
        let client = ClientId::generate();
        for bad in ["", "..", "../etc/passwd", "a/b", "a\\b", "nul\0byte"] {
            assert!(storage.allocate(&client, bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_create_write_remove() {
        let (storage, _dir) = test_storage();
        let client = ClientId::generate();
        let path = storage.allocate(&client, "notes.txt").unwrap();

        let mut file = storage.create(&path).unwrap();
        file.write_all(b"ciphertext").unwrap();
        drop(file);
        assert_eq!(fs::read(&path).unwrap(), b"ciphertext");

        storage.remove(&path).unwrap();
        assert!(!path.exists());
        // second remove is a no-op
        storage.remove(&path).unwrap();
    }

    #[test]
    fn test_paths_outside_root_rejected() {
        let (storage, dir) = test_storage();
        let outside = dir.path().join("elsewhere.bin");
        assert!(storage.create(&outside).is_err());
    }
}

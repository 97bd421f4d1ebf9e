/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A durable [`Store`] that keeps its contents in memory and mirrors them to a snapshot file.
//!
//! Every mutation rewrites the snapshot atomically: the new contents are written to a temporary file next to
//! it, synced, and renamed over the old snapshot. A crash therefore leaves either the old or the new snapshot,
//! never a mix of both.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::KVError;
use crate::types::{Key, Value};

use super::Store;

pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<Key, Value>,
}

impl FileStore {
    /// Open the store persisted at `path`, or create an empty one if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<FileStore, KVError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) => BTreeMap::<Key, Value>::try_from_slice(&bytes)
                .map_err(|err| KVError::Io(format!("corrupt store snapshot {}: {}", path.display(), err)))?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(FileStore { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<(), KVError> {
        let bytes = self
            .entries
            .try_to_vec()
            .map_err(|err| KVError::Io(err.to_string()))?;
        write_atomically(&self.path, &bytes)
    }
}

impl Store for FileStore {
    fn put(&mut self, key: Key, value: Value) -> Result<(), KVError> {
        let previous = self.entries.insert(key.clone(), value);
        if let Err(err) = self.persist() {
            match previous {
                Some(previous) => self.entries.insert(key, previous),
                None => self.entries.remove(&key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Value, KVError> {
        self.entries.get(key).cloned().ok_or(KVError::NoSuchKey)
    }

    fn del(&mut self, key: &[u8]) -> Result<(), KVError> {
        let previous = self.entries.remove(key).ok_or(KVError::NoSuchKey)?;
        if let Err(err) = self.persist() {
            self.entries.insert(key.to_vec(), previous);
            return Err(err);
        }
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Replace the contents of `path` with `bytes` so that a crash leaves either the old or the new contents.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), KVError> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let mut tmp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    tmp_file.write_all(bytes)?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    fs::rename(&tmp_path, path)?;

    // Make the rename itself durable. Not every platform lets a directory be opened for this.
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let mut store = FileStore::open(&path).unwrap();
        assert!(store.is_empty());
        store.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        store.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        store.del(b"a").unwrap();
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(b"a"), Err(KVError::NoSuchKey));
        assert_eq!(store.get(b"b"), Ok(b"2".to_vec()));
        assert!(store.is_durable());
        assert!(!dir.path().join("store.db.tmp").exists());
    }

    #[test]
    fn deleting_an_absent_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path().join("store.db")).unwrap();
        assert_eq!(store.del(b"missing"), Err(KVError::NoSuchKey));
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        fs::write(&path, [0xff, 0xff, 0xff, 0xff, 0x01]).unwrap();
        assert!(matches!(FileStore::open(&path), Err(KVError::Io(_))));
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The write-ahead log each storage node keeps of the transactions it takes part in.
//!
//! ## File format
//!
//! The log is a single append-only file of records, each framed as:
//!
//! ```text
//! [len: u32, little endian][checksum: 4 bytes][payload: len bytes]
//! ```
//!
//! where the payload is the borsh encoding of a [LogRecord] and the checksum is the first four bytes of the
//! SHA-256 hash of the payload. Every append is flushed to stable storage before it returns.
//!
//! A crash in the middle of an append leaves a torn record at the end of the file. When the log is opened, the
//! records before the first damaged one (short header, short payload, bad checksum, or undecodable payload) are
//! kept and everything from it on is truncated away.
//!
//! ## Recovery
//!
//! [WriteAheadLog::replay] walks the records in order to rebuild the node's local data. A PUT or DEL becomes
//! the pending operation, a COMMIT applies the pending operation, and an ABORT discards it. Whatever operation
//! is still pending at the end of the log was voted on but not yet decided, and is handed back to the caller.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use crate::error::KVError;
use crate::kv_server::KVServer;
use crate::store::file_store::write_atomically;
use crate::store::Store;
use crate::types::{Decision, Key, Operation, Value};

const HEADER_SIZE: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum LogRecord {
    Put { key: Key, value: Value },
    Del { key: Key },
    Commit,
    Abort,
    Ack,
}

impl LogRecord {
    pub fn operation(&self) -> Option<Operation> {
        match self {
            LogRecord::Put { key, value } => Some(Operation::Put(key.clone(), value.clone())),
            LogRecord::Del { key } => Some(Operation::Del(key.clone())),
            _ => None,
        }
    }

    pub fn decision(&self) -> Option<Decision> {
        match self {
            LogRecord::Commit => Some(Decision::Commit),
            LogRecord::Abort => Some(Decision::Abort),
            _ => None,
        }
    }
}

impl From<&Operation> for LogRecord {
    fn from(operation: &Operation) -> Self {
        match operation {
            Operation::Put(key, value) => LogRecord::Put {
                key: key.clone(),
                value: value.clone(),
            },
            Operation::Del(key) => LogRecord::Del { key: key.clone() },
        }
    }
}

impl From<Decision> for LogRecord {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Commit => LogRecord::Commit,
            Decision::Abort => LogRecord::Abort,
        }
    }
}

pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
    entries: Vec<LogRecord>,
}

impl WriteAheadLog {
    /// Open the log at `path`, creating it if it does not exist, and load its records.
    pub fn open(path: impl AsRef<Path>) -> Result<WriteAheadLog, KVError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let bytes = std::fs::read(&path)?;
        let (entries, valid_len) = parse_records(&bytes);
        if valid_len < bytes.len() {
            log::warn!(
                "Write-ahead log {} has a damaged tail: keeping {} records, truncating {} bytes",
                path.display(),
                entries.len(),
                bytes.len() - valid_len
            );
            file.set_len(valid_len as u64)?;
            file.sync_data()?;
        }

        Ok(WriteAheadLog {
            path,
            file,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record` and flush it to stable storage.
    pub fn append_and_flush(&mut self, record: LogRecord) -> Result<(), KVError> {
        let frame = encode_frame(&record)?;
        self.file.write_all(&frame)?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.entries.push(record);
        Ok(())
    }

    pub fn entries(&self) -> &[LogRecord] {
        &self.entries
    }

    pub fn last_entry(&self) -> Option<&LogRecord> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent COMMIT or ABORT in the log.
    pub fn last_decision(&self) -> Option<Decision> {
        self.entries.iter().rev().find_map(LogRecord::decision)
    }

    /// Re-apply the committed operations in the log to `kv_server`, returning the operation left pending.
    ///
    /// Replaying is idempotent: a PUT overwrites with the same value, and a DEL of a key that is already gone
    /// is skipped.
    pub fn replay<S: Store>(&self, kv_server: &KVServer<S>) -> Result<Option<Operation>, KVError> {
        let mut pending = None;
        for record in &self.entries {
            match record {
                LogRecord::Put { .. } | LogRecord::Del { .. } => pending = record.operation(),
                LogRecord::Commit => {
                    if let Some(operation) = pending.take() {
                        apply(kv_server, operation)?;
                    }
                }
                LogRecord::Abort => pending = None,
                LogRecord::Ack => {}
            }
        }
        Ok(pending)
    }

    /// Rewrite the log keeping only the records from the last decision onwards. Returns the number of records
    /// dropped.
    ///
    /// Everything before the last decision belongs to transactions whose outcome is already reflected in the
    /// node's store, so this must only be called when that store is durable. The last decision itself is kept
    /// so that a repeated delivery of it can still be recognised.
    pub fn compact(&mut self) -> Result<usize, KVError> {
        let Some(start) = self.entries.iter().rposition(|record| record.decision().is_some()) else {
            return Ok(0);
        };
        if start == 0 {
            return Ok(0);
        }

        let kept = self.entries.split_off(start);
        let mut bytes = Vec::new();
        for record in &kept {
            bytes.extend_from_slice(&encode_frame(record)?);
        }

        if let Err(err) = write_atomically(&self.path, &bytes) {
            // The file on disk was not replaced, so it still holds every record.
            self.entries.extend(kept);
            return Err(err);
        }
        self.file = OpenOptions::new().read(true).append(true).open(&self.path)?;

        let dropped = self.entries.len();
        self.entries = kept;
        Ok(dropped)
    }
}

fn apply<S: Store>(kv_server: &KVServer<S>, operation: Operation) -> Result<(), KVError> {
    match operation {
        Operation::Put(key, value) => kv_server.put(key, value),
        Operation::Del(key) => match kv_server.del(&key) {
            Ok(()) | Err(KVError::NoSuchKey) => Ok(()),
            Err(err) => Err(err),
        },
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

fn encode_frame(record: &LogRecord) -> Result<Vec<u8>, KVError> {
    let payload = record.try_to_vec().map_err(|err| KVError::Io(err.to_string()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(&payload));
    frame.extend_from_slice(&payload);
    Ok(frame)
}

// Returns the records up to the first damaged one, and the length of the intact prefix of `bytes`.
fn parse_records(bytes: &[u8]) -> (Vec<LogRecord>, usize) {
    let mut records = Vec::new();
    let mut offset = 0;

    while bytes.len() - offset >= HEADER_SIZE {
        let header = &bytes[offset..offset + HEADER_SIZE];
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let payload_start = offset + HEADER_SIZE;
        if bytes.len() - payload_start < len {
            break;
        }

        let payload = &bytes[payload_start..payload_start + len];
        if checksum(payload) != header[4..HEADER_SIZE] {
            break;
        }
        let Ok(record) = LogRecord::try_from_slice(payload) else {
            break;
        };

        records.push(record);
        offset = payload_start + len;
    }

    (records, offset)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::store::{FileStore, MemStore};

    fn put(key: &[u8], value: &[u8]) -> LogRecord {
        LogRecord::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    fn mem_server() -> KVServer<MemStore> {
        KVServer::new(MemStore::new(), 4, 4)
    }

    #[test]
    fn records_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");

        let mut wal = WriteAheadLog::open(&path).unwrap();
        assert!(wal.is_empty());
        wal.append_and_flush(put(b"k", b"v")).unwrap();
        wal.append_and_flush(LogRecord::Commit).unwrap();
        wal.append_and_flush(LogRecord::Ack).unwrap();
        drop(wal);

        let wal = WriteAheadLog::open(&path).unwrap();
        assert_eq!(wal.entries(), &[put(b"k", b"v"), LogRecord::Commit, LogRecord::Ack]);
        assert_eq!(wal.last_entry(), Some(&LogRecord::Ack));
        assert_eq!(wal.last_decision(), Some(Decision::Commit));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");

        let mut wal = WriteAheadLog::open(&path).unwrap();
        wal.append_and_flush(put(b"k", b"v")).unwrap();
        wal.append_and_flush(LogRecord::Commit).unwrap();
        drop(wal);
        let intact_len = fs::metadata(&path).unwrap().len();

        // Half of a third record.
        let frame = encode_frame(&put(b"other", b"value")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&frame[..frame.len() / 2]).unwrap();
        drop(file);

        let mut wal = WriteAheadLog::open(&path).unwrap();
        assert_eq!(wal.len(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        // Appends after the truncation are readable again.
        wal.append_and_flush(LogRecord::Ack).unwrap();
        drop(wal);
        assert_eq!(WriteAheadLog::open(&path).unwrap().len(), 3);
    }

    #[test]
    fn checksum_mismatch_ends_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");

        let mut wal = WriteAheadLog::open(&path).unwrap();
        wal.append_and_flush(put(b"k", b"v")).unwrap();
        wal.append_and_flush(put(b"k", b"w")).unwrap();
        drop(wal);

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let wal = WriteAheadLog::open(&path).unwrap();
        assert_eq!(wal.entries(), &[put(b"k", b"v")]);
    }

    #[test]
    fn replay_applies_committed_and_returns_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WriteAheadLog::open(dir.path().join("node.log")).unwrap();
        for record in [
            put(b"a", b"1"),
            LogRecord::Commit,
            LogRecord::Ack,
            put(b"b", b"2"),
            LogRecord::Abort,
            LogRecord::Ack,
            LogRecord::Del { key: b"a".to_vec() },
            LogRecord::Commit,
            LogRecord::Ack,
            put(b"c", b"3"),
        ] {
            wal.append_and_flush(record).unwrap();
        }

        let server = mem_server();
        let pending = wal.replay(&server).unwrap();
        assert_eq!(pending, Some(Operation::Put(b"c".to_vec(), b"3".to_vec())));
        assert!(!server.has_key(b"a"));
        assert!(!server.has_key(b"b"));
        assert!(!server.has_key(b"c"));
    }

    #[test]
    fn replay_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WriteAheadLog::open(dir.path().join("node.log")).unwrap();
        for _ in 0..3 {
            wal.append_and_flush(put(b"k", b"v")).unwrap();
            wal.append_and_flush(LogRecord::Commit).unwrap();
        }
        wal.append_and_flush(LogRecord::Del { key: b"gone".to_vec() }).unwrap();
        wal.append_and_flush(LogRecord::Commit).unwrap();

        let server = mem_server();
        assert_eq!(wal.replay(&server), Ok(None));
        assert_eq!(wal.replay(&server), Ok(None));
        assert_eq!(server.get(b"k"), Ok(b"v".to_vec()));
    }

    #[test]
    fn compaction_keeps_the_last_decision_onwards() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("node.log");
        let server = KVServer::new(FileStore::open(dir.path().join("store.db")).unwrap(), 4, 4);

        let mut wal = WriteAheadLog::open(&log_path).unwrap();
        for record in [put(b"a", b"1"), LogRecord::Commit, LogRecord::Ack, put(b"b", b"2"), LogRecord::Commit, LogRecord::Ack] {
            wal.append_and_flush(record).unwrap();
        }
        wal.replay(&server).unwrap();

        assert_eq!(wal.compact(), Ok(4));
        assert_eq!(wal.entries(), &[LogRecord::Commit, LogRecord::Ack]);
        assert_eq!(wal.last_decision(), Some(Decision::Commit));
        assert_eq!(wal.compact(), Ok(0));

        wal.append_and_flush(put(b"c", b"3")).unwrap();
        drop(wal);

        let wal = WriteAheadLog::open(&log_path).unwrap();
        assert_eq!(wal.entries(), &[LogRecord::Commit, LogRecord::Ack, put(b"c", b"3")]);
        assert_eq!(server.get(b"a"), Ok(b"1".to_vec()));
    }
}

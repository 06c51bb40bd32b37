//! Write-ahead log: segment-free, self-delimiting record append log backing
//! both crash recovery and the change feed (§4.6).
//!
//! Each record is `[len: u32][seq_no: u64][crc32: u32][payload; len]`.
//! Records are self-delimiting so a reader recovering after a crash can
//! detect and stop at the first truncated or corrupt record instead of
//! misreading the rest of the file.

mod durability;

pub use durability::DurabilityMode;

use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use cdxd_core::SequenceNumber;

/// Errors raised by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying file I/O failed.
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One decoded WAL record: the sequence number assigned to its batch, and
/// the batch's opaque serialized mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Sequence number assigned at commit time.
    pub seq_no: SequenceNumber,
    /// Opaque serialized batch payload (see `storage::batch`).
    pub payload: Vec<u8>,
}

/// Outcome of reading a WAL file: the records found, and whether reading
/// stopped early because of a truncated or corrupt trailing record (the
/// normal, recoverable outcome of a crash mid-write).
#[derive(Debug, Default)]
pub struct WalReadResult {
    /// Records read successfully, in append order.
    pub records: Vec<WalRecord>,
    /// True if the file ended with a truncated or corrupt record that was
    /// discarded rather than returned.
    pub truncated_tail: bool,
}

/// Appends records to a WAL file and controls when they are fsynced.
#[derive(Debug)]
pub struct WalWriter {
    file: File,
    path: PathBuf,
    mode: DurabilityMode,
    commits_since_fsync: usize,
}

impl WalWriter {
    /// Open (creating if absent) the WAL file at `path` for appending.
    pub fn open(path: impl AsRef<Path>, mode: DurabilityMode) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(WalWriter {
            file,
            path,
            mode,
            commits_since_fsync: 0,
        })
    }

    /// Path of the WAL file this writer appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Fsyncs immediately if the durability mode
    /// requires it; batched modes rely on a periodic caller to invoke
    /// [`WalWriter::flush`].
    pub fn append(&mut self, seq_no: SequenceNumber, payload: &[u8]) -> Result<(), WalError> {
        if !self.mode.requires_wal() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(16 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&seq_no.to_be_bytes());
        let mut hasher = Hasher::new();
        hasher.update(payload);
        buf.extend_from_slice(&hasher.finalize().to_be_bytes());
        buf.extend_from_slice(payload);
        self.file.write_all(&buf)?;

        self.commits_since_fsync += 1;
        if self.mode.requires_immediate_fsync() {
            self.flush()?;
        } else if let DurabilityMode::Batched { batch_size, .. } = self.mode {
            if self.commits_since_fsync >= batch_size {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Force an fsync now regardless of durability mode.
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_data()?;
        self.commits_since_fsync = 0;
        Ok(())
    }
}

/// Reads WAL records back, for recovery and for the change feed.
pub struct WalReader;

impl WalReader {
    /// Read every well-formed record from `path`. Missing files read as
    /// empty. Stops at (and reports) the first truncated or corrupt record.
    pub fn read_all(path: impl AsRef<Path>) -> Result<WalReadResult, WalError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(WalReadResult::default());
        }
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        loop {
            match read_one_record(&mut reader) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => return Ok(WalReadResult {
                    records,
                    truncated_tail: false,
                }),
                Err(_) => {
                    return Ok(WalReadResult {
                        records,
                        truncated_tail: true,
                    })
                }
            }
        }
    }

    /// Read records with `seq_no > after`, in append order.
    pub fn read_after(path: impl AsRef<Path>, after: SequenceNumber) -> Result<WalReadResult, WalError> {
        let mut result = Self::read_all(path)?;
        result.records.retain(|r| r.seq_no > after);
        Ok(result)
    }
}

fn read_one_record<R: Read>(reader: &mut R) -> io::Result<Option<WalRecord>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut seq_buf = [0u8; 8];
    reader.read_exact(&mut seq_buf)?;
    let seq_no = u64::from_be_bytes(seq_buf);

    let mut crc_buf = [0u8; 4];
    reader.read_exact(&mut crc_buf)?;
    let expected_crc = u32::from_be_bytes(crc_buf);

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != expected_crc {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "WAL record checksum mismatch"));
    }

    Ok(Some(WalRecord { seq_no, payload }))
}

/// Rewrite the WAL file at `path` keeping only records with
/// `seq_no >= keep_from`, for the `truncate_replication` operator endpoint
/// (§6.1) and retention enforcement. Returns the number of records kept.
pub fn truncate_before(path: impl AsRef<Path>, keep_from: SequenceNumber) -> Result<usize, WalError> {
    let path = path.as_ref();
    let existing = WalReader::read_all(path)?;
    let kept: Vec<_> = existing
        .records
        .into_iter()
        .filter(|r| r.seq_no >= keep_from)
        .collect();
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    for record in &kept {
        let mut buf = Vec::with_capacity(16 + record.payload.len());
        buf.extend_from_slice(&(record.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&record.seq_no.to_be_bytes());
        let mut hasher = Hasher::new();
        hasher.update(&record.payload);
        buf.extend_from_slice(&hasher.finalize().to_be_bytes());
        buf.extend_from_slice(&record.payload);
        file.write_all(&buf)?;
    }
    file.sync_data()?;
    let _ = file.seek(SeekFrom::End(0));
    Ok(kept.len())
}

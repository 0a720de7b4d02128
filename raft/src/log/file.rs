//! A durable, file-backed implementation of [`Log`](super::Log).
//!
//! Entries are appended to a flat file as length-prefixed records (`term: u64`, `len: u32`, then
//! `len` bytes of data), fsync'd before [`append`](FileLog::append) returns, so a crashed process
//! can recover its log by replaying the file from the start. This is the persisted `raft.log` used
//! by the lock role; roles that don't need durability keep using
//! [`InMemoryLog`](super::memory::InMemoryLog).

extern crate std;

use alloc::collections::VecDeque;
use core::convert::{TryFrom, TryInto};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;

use crate::message::{LogEntry, LogIndex, TermId};

use super::Log;

const HEADER_LEN: u64 = 8 + 4;

/// A [`Log`] backed by an append-only file, replayed on open.
pub struct FileLog {
    file: File,
    entries: VecDeque<LogEntry>,
    /// Byte offset of the start of each entry in `entries`, same length as `entries`.
    offsets: VecDeque<u64>,
    file_len: u64,
    prev_log_idx: LogIndex,
    prev_log_term: TermId,
    last_taken: LogIndex,
}

impl FileLog {
    /// Opens (creating if necessary) the log file at `path`, replaying any entries already
    /// present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, or contains a truncated or corrupt record.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let mut entries = VecDeque::new();
        let mut offsets = VecDeque::new();
        let mut offset = 0u64;

        file.seek(SeekFrom::Start(0))?;
        loop {
            let mut header = [0u8; HEADER_LEN as usize];
            match read_exact_or_eof(&mut file, &mut header)? {
                false => break,
                true => {}
            }
            let term = u64::from_be_bytes(header[0..8].try_into().unwrap());
            let data_len = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
            let mut data = alloc::vec![0u8; data_len];
            file.read_exact(&mut data).map_err(|_| truncated_record())?;

            entries.push_back(LogEntry {
                term: TermId { id: term },
                data: Bytes::from(data),
            });
            offsets.push_back(offset);
            offset += HEADER_LEN + data_len as u64;
        }

        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            entries,
            offsets,
            file_len: offset,
            prev_log_idx: LogIndex::default(),
            prev_log_term: TermId::default(),
            last_taken: LogIndex::default(),
        })
    }

    fn entry_index(&self, log_idx: LogIndex) -> Option<usize> {
        log_idx
            .id
            .checked_sub(self.prev_log_idx.id)?
            .checked_sub(1)?
            .try_into()
            .ok()
    }
}

impl Log for FileLog {
    type Error = io::Error;

    fn append(&mut self, log_entry: LogEntry) -> Result<(), Self::Error> {
        let data_len = u32::try_from(log_entry.data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry too large"))?;

        let mut record = alloc::vec::Vec::with_capacity(HEADER_LEN as usize + data_len as usize);
        record.extend_from_slice(&log_entry.term.id.to_be_bytes());
        record.extend_from_slice(&data_len.to_be_bytes());
        record.extend_from_slice(&log_entry.data);

        self.file.write_all(&record)?;
        self.file.sync_data()?;

        self.offsets.push_back(self.file_len);
        self.file_len += record.len() as u64;
        self.entries.push_back(log_entry);
        Ok(())
    }

    fn cancel_from(&mut self, from_log_idx: LogIndex) -> Result<usize, Self::Error> {
        let from_index = self
            .entry_index(from_log_idx)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "index out of range"))?;
        let cancelled_len = self
            .entries
            .len()
            .checked_sub(from_index)
            .filter(|len| *len > 0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "nothing to cancel"))?;

        let truncate_at = self.offsets[from_index];
        self.file.set_len(truncate_at)?;
        self.file.sync_all()?;
        self.file.seek(SeekFrom::End(0))?;

        self.entries.truncate(from_index);
        self.offsets.truncate(from_index);
        self.file_len = truncate_at;
        Ok(cancelled_len)
    }

    fn entry_len(&self, log_entry: &LogEntry) -> usize {
        HEADER_LEN as usize + log_entry.data.len()
    }

    fn get(&mut self, log_idx: LogIndex) -> Option<LogEntry> {
        let index = self.entry_index(log_idx)?;
        self.entries.get(index).cloned()
    }

    fn get_term(&mut self, log_idx: LogIndex) -> Option<TermId> {
        if log_idx != self.prev_log_idx {
            self.get(log_idx).map(|log_entry: LogEntry| log_entry.term)
        } else {
            Some(self.prev_log_term)
        }
    }

    fn prev_index(&self) -> LogIndex {
        self.prev_log_idx
    }

    fn last_index(&self) -> LogIndex {
        let entries_len = u64::try_from(self.entries.len())
            .unwrap_or_else(|_| panic!("more than 2^64 log entries"));
        self.prev_log_idx + entries_len
    }

    fn last_taken_index(&self) -> LogIndex {
        self.last_taken
    }

    fn last_term(&self) -> TermId {
        self.entries
            .iter()
            .map(|log_entry: &LogEntry| log_entry.term)
            .last()
            .unwrap_or(self.prev_log_term)
    }

    fn prev_term(&self) -> TermId {
        self.prev_log_term
    }

    fn take_next(&mut self) -> Option<LogEntry> {
        let log_idx = self.last_taken + 1;
        let log_entry = self.get(log_idx)?;
        self.last_taken = log_idx;
        Some(log_entry)
    }
}

fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> io::Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        match file.read(&mut buf[read..])? {
            0 if read == 0 => return Ok(false),
            0 => return Err(truncated_record()),
            n => read += n,
        }
    }
    Ok(true)
}

fn truncated_record() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated log record")
}

#[cfg(test)]
mod test {
    use crate::raft_log_tests;

    use super::*;

    struct TempFileLog {
        inner: FileLog,
        path: std::path::PathBuf,
    }

    impl TempFileLog {
        fn new() -> Self {
            let mut path = std::env::temp_dir();
            path.push(std::format!("raft-filelog-test-{:p}", &path));
            Self {
                inner: FileLog::open(&path).expect("open log file"),
                path,
            }
        }
    }

    impl Drop for TempFileLog {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl Log for TempFileLog {
        type Error = io::Error;

        fn append(&mut self, entry: LogEntry) -> Result<(), Self::Error> {
            self.inner.append(entry)
        }
        fn cancel_from(&mut self, from_index: LogIndex) -> Result<usize, Self::Error> {
            self.inner.cancel_from(from_index)
        }
        fn entry_len(&self, entry: &LogEntry) -> usize {
            self.inner.entry_len(entry)
        }
        fn get(&mut self, index: LogIndex) -> Option<LogEntry> {
            self.inner.get(index)
        }
        fn get_term(&mut self, index: LogIndex) -> Option<TermId> {
            self.inner.get_term(index)
        }
        fn last_taken_index(&self) -> LogIndex {
            self.inner.last_taken_index()
        }
        fn last_index(&self) -> LogIndex {
            self.inner.last_index()
        }
        fn last_term(&self) -> TermId {
            self.inner.last_term()
        }
        fn prev_index(&self) -> LogIndex {
            self.inner.prev_index()
        }
        fn prev_term(&self) -> TermId {
            self.inner.prev_term()
        }
        fn take_next(&mut self) -> Option<LogEntry> {
            self.inner.take_next()
        }
    }

    raft_log_tests!(TempFileLog, TempFileLog::new());

    #[test]
    fn test_replay_after_reopen() {
        let mut path = std::env::temp_dir();
        path.push(std::format!("raft-filelog-replay-{:p}", &path));
        let _ = std::fs::remove_file(&path);

        {
            let mut log = FileLog::open(&path).expect("open log file");
            log.append(LogEntry {
                term: TermId { id: 1 },
                data: Bytes::from_static(b"hello"),
            })
            .expect("append");
            log.append(LogEntry {
                term: TermId { id: 2 },
                data: Bytes::from_static(b"world"),
            })
            .expect("append");
        }

        let mut reopened = FileLog::open(&path).expect("reopen log file");
        assert_eq!(reopened.last_index(), LogIndex { id: 2 });
        assert_eq!(
            reopened.get(LogIndex { id: 1 }).map(|e| e.data),
            Some(Bytes::from_static(b"hello"))
        );
        assert_eq!(
            reopened.get(LogIndex { id: 2 }).map(|e| e.data),
            Some(Bytes::from_static(b"world"))
        );

        let _ = std::fs::remove_file(&path);
    }
}

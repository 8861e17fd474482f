//! File-backed actuator journal.
//!
//! Layout is a fixed 5-byte record rewritten in place:
//! `[in_progress: u8 (0|1)][position: i32 little-endian]`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use irrigo_traits::{HwResult, JournalEntry, JournalStore};

use crate::error::HwError;

pub const RECORD_LEN: usize = 5;

#[derive(Debug, Clone)]
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn encode(entry: JournalEntry) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    buf[0] = u8::from(entry.in_progress);
    buf[1..].copy_from_slice(&entry.position.to_le_bytes());
    buf
}

pub fn decode(bytes: &[u8]) -> Result<JournalEntry, HwError> {
    let [flag, p0, p1, p2, p3] = bytes else {
        return Err(HwError::CorruptJournal(format!(
            "expected {RECORD_LEN} bytes, found {}",
            bytes.len()
        )));
    };
    let in_progress = match *flag {
        0 => false,
        1 => true,
        other => {
            return Err(HwError::CorruptJournal(format!(
                "bad in-progress flag {other:#04x}"
            )));
        }
    };
    Ok(JournalEntry {
        in_progress,
        position: i32::from_le_bytes([*p0, *p1, *p2, *p3]),
    })
}

impl JournalStore for FileJournal {
    fn load(&mut self) -> HwResult<Option<JournalEntry>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(decode(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HwError::Io(e).into()),
        }
    }

    fn store(&mut self, entry: JournalEntry) -> HwResult<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(HwError::Io)?;
        f.seek(SeekFrom::Start(0)).map_err(HwError::Io)?;
        f.write_all(&encode(entry)).map_err(HwError::Io)?;
        f.set_len(RECORD_LEN as u64).map_err(HwError::Io)?;
        f.sync_data().map_err(HwError::Io)?;
        Ok(())
    }
}

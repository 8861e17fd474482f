use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use irrigo_traits::{BlobStore, HwResult};

use crate::error::HwError;

/// Replace `path` with `bytes` via a synced temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// Blob store keeping one file per document in a directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Creates `root` if it does not exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, HwError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl BlobStore for DirStore {
    fn read(&self, name: &str) -> HwResult<Option<Vec<u8>>> {
        match fs::read(self.path_of(name)) {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HwError::Io(e).into()),
        }
    }

    fn write(&mut self, name: &str, bytes: &[u8]) -> HwResult<()> {
        write_atomic(&self.path_of(name), bytes).map_err(HwError::Io)?;
        Ok(())
    }
}

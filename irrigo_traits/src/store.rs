use crate::HwResult;

/// Named document storage for calibration and run records.
///
/// Writes replace the whole document. A torn write must leave either the
/// previous or the new contents behind.
pub trait BlobStore {
    /// `Ok(None)` when the document does not exist.
    fn read(&self, name: &str) -> HwResult<Option<Vec<u8>>>;
    fn write(&mut self, name: &str, bytes: &[u8]) -> HwResult<()>;
}

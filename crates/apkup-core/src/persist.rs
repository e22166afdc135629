use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Replace `path` with `data` without ever exposing a half written file.
///
/// The data is staged in a temporary file next to `path` and renamed over
/// it once synced.
///
/// # Errors
/// Returns an error when the temporary file cannot be written or moved into
/// place.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;

    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|error| error.error)?;
    Ok(())
}

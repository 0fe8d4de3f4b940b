//! Whole-file mirrors on disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{PredictorError, Result};

/// Serializes `value` as JSON and replaces the file at `path` with it. The bytes go to a
/// sibling temp file first and are renamed over the target, so readers see either the old
/// or the new mirror, never a truncated one.
pub fn write_json_atomically<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let tmp = temp_path(path);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PredictorError::io(parent, e))?;
    }

    let mut file = fs::File::create(&tmp).map_err(|e| PredictorError::io(&tmp, e))?;
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| PredictorError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| PredictorError::io(path, e))?;
    Ok(())
}

/// Reads the whole file at `path`, `None` when it does not exist.
pub fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PredictorError::io(path, e)),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};

use crate::errors::WizardError;

const TMP_SUFFIX: &str = "tmp";

/// Serializes `value` as YAML and replaces `path` atomically by staging to a
/// sibling temporary file.
pub fn save_yaml<T: Serialize>(value: &T, path: &Path) -> Result<(), WizardError> {
    let yaml = serde_yaml::to_string(value)?;
    write_atomic(path, &yaml)
}

/// Loads a YAML document, returning `None` when the file does not exist.
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, WizardError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_yaml::from_str(&data)?))
}

/// Writes `data` to `path` through a temporary file and a rename.
pub fn write_atomic(path: &Path, data: &str) -> Result<(), WizardError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(data.as_bytes())?;
    file.flush()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(existing) => format!("{}.{}", existing, TMP_SUFFIX),
        None => TMP_SUFFIX.to_string(),
    };
    tmp.set_extension(ext);
    tmp
}

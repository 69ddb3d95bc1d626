use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{WorkspaceError, WorkspaceResult};

/// Replace a run artifact with pretty JSON.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> WorkspaceResult<()> {
    let data = serde_json::to_vec_pretty(value)?;
    replace(path, &data)
}

/// Replace a settings file with pretty TOML.
pub fn write_toml_atomic<T: Serialize>(path: &Path, value: &T) -> WorkspaceResult<()> {
    let data = toml::to_string_pretty(value)?;
    replace(path, data.as_bytes())
}

/// Stage `data` in a hidden `.partial` sibling, then rename it over `path`.
/// A crashed run leaves either the previous file or the new one, never a mix.
fn replace(path: &Path, data: &[u8]) -> WorkspaceResult<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let partial = partial_path(path)?;
    let mut file = File::create(&partial)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = std::fs::rename(&partial, path) {
        let _ = std::fs::remove_file(&partial);
        return Err(err.into());
    }
    // The rename only survives a crash once the directory entry is flushed.
    File::open(dir)?.sync_all()?;
    Ok(())
}

fn partial_path(path: &Path) -> WorkspaceResult<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| WorkspaceError::Invalid(format!("no file name in {}", path.display())))?;
    Ok(path.with_file_name(format!(".{}.partial", name.to_string_lossy())))
}

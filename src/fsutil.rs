//! Small filesystem and text helpers shared by the index, the tree manager and snapshots.
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::error::DocTreeError;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `data` to `<path>.tmp`, then rename it over `path`. A crash leaves either the old or the
/// new file, never a partial one.
pub fn write_atomic<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<(), DocTreeError> {
    let path = path.as_ref();
    let tmp = tmp_path(path);
    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });
    if let Err(e) = written {
        fs::remove_file(&tmp).ok();
        return Err(DocTreeError::Io(format!(
            "failed to write temp file {}: {e}",
            tmp.display()
        )));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        fs::remove_file(&tmp).ok();
        return Err(DocTreeError::Io(format!(
            "failed to rename temp file over {}: {e}",
            path.display()
        )));
    }
    Ok(())
}

/// Serialize `value` as indented JSON and replace `path` atomically.
pub fn write_json_atomic<P: AsRef<Path>, T: serde::Serialize>(
    path: P,
    value: &T,
) -> Result<(), DocTreeError> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    write_atomic(path, &data)
}

/// Removing a file that is already gone counts as success.
pub fn remove_if_exists<P: AsRef<Path>>(path: P) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Read a UTF-8 file, treating a missing file as empty content.
pub fn read_or_empty<P: AsRef<Path>>(path: P) -> io::Result<String> {
    match fs::read_to_string(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        other => other,
    }
}

/// Largest char boundary `<= index`.
pub fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary `>= index`.
pub fn ceil_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

//! Utility functions for quicksave
//!
//! Hashing, key/file name minting, and small path helpers shared by the
//! lifecycle operations and the integrity scanner.
//!
//! ## Name minting
//!
//! Keys and storage names are derived from a sanitized form of the source
//! file's basename:
//!
//! - [`make_key`] appends a numeric disambiguator starting at 1
//!   (`notes_FK1`, `notes_FK2`, ...)
//! - [`reserve_name`] keeps the name as-is when free and otherwise inserts
//!   `_N` before the extension (`notes.txt`, `notes_1.txt`, ...)

use crate::error::{QuicksaveError, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Chunk size used when streaming file content through the hasher
pub const HASH_CHUNK_SIZE: usize = 4096;

/// Length of the short hash alias
pub const SHORT_HASH_LEN: usize = 7;

/// Number of basename characters kept in minted key prefixes
const KEY_PREFIX_LEN: usize = 5;

/// Hash a file's content using SHA-256
///
/// The file is streamed in [`HASH_CHUNK_SIZE`] chunks so memory use stays
/// constant regardless of file size. Returns the lowercase hex digest.
///
/// # Errors
///
/// - [`QuicksaveError::MissingFile`] if the file does not exist
/// - [`QuicksaveError::Io`] for any other read failure
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| missing_or_io(e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let digest = hex::encode(hasher.finalize());
    trace!("Hashed {:?}: {}", path, &digest[..SHORT_HASH_LEN]);
    Ok(digest)
}

/// Hash arbitrary data using SHA-256
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// The short alias form of a full hex digest
pub fn short_hash(hash: &str) -> &str {
    hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}

/// Sanitize a basename for use in storage and key names
///
/// Keeps alphanumeric characters, plus `.` when `keep_dots` is set.
pub fn canonical_name(basename: &str, keep_dots: bool) -> String {
    basename
        .chars()
        .filter(|c| c.is_alphanumeric() || (keep_dots && *c == '.'))
        .collect()
}

/// Prefix used for minted keys: the first few alphanumerics of `canonical`
pub fn key_prefix(canonical: &str, suffix: &str) -> String {
    let mut prefix: String = canonical
        .chars()
        .filter(|c| *c != '.')
        .take(KEY_PREFIX_LEN)
        .collect();
    prefix.push_str(suffix);
    prefix
}

/// Mint `{base}{n}` for the smallest `n >= 1` not present in `taken`
pub fn make_key<S>(base: &str, taken: &BTreeSet<S>) -> String
where
    S: std::borrow::Borrow<str> + Ord,
{
    let mut index = 1usize;
    loop {
        let candidate = format!("{}{}", base, index);
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        index += 1;
    }
}

/// Reserve a file name, disambiguating with `_N` before the extension
pub fn reserve_name<S>(name: &str, taken: &BTreeSet<S>) -> String
where
    S: std::borrow::Borrow<str> + Ord,
{
    if !taken.contains(name) {
        return name.to_string();
    }

    let (stem, extension) = split_extension(name);
    let mut index = 1usize;
    loop {
        let candidate = format!("{}_{}{}", stem, index, extension);
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        index += 1;
    }
}

/// Split `name` into stem and extension (extension keeps its leading dot)
///
/// A leading dot is part of the stem, so `.bashrc` has no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Make a path absolute without resolving symlinks
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

/// The final component of `path` as a string
pub fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| QuicksaveError::InvalidPath(path.to_path_buf()))
}

/// Map a `NotFound` I/O error to [`QuicksaveError::MissingFile`]
pub fn missing_or_io(err: std::io::Error, path: &Path) -> QuicksaveError {
    if err.kind() == std::io::ErrorKind::NotFound {
        QuicksaveError::MissingFile { path: path.to_path_buf() }
    } else {
        QuicksaveError::Io(err)
    }
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Replace `path` with `content` through a sibling temp file
///
/// The temp file lives in the target's directory so the final rename never
/// crosses a filesystem. Readers see either the old or the new content.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::Builder::new().prefix(".quicksave").tempfile_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| QuicksaveError::Io(e.error))?;

    Ok(())
}

use std::{
    fs::File,
    io::{ErrorKind, Read},
    path::Path,
};

use sha2::{Digest, Sha256};
use tracing::debug;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Digest plus the cheap metadata gathered while reading the file once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub digest: String,
    pub size_bytes: u64,
    pub line_count: usize,
}

/// SHA-256 of the file's raw bytes as lowercase hex, or `None` when the path is
/// missing, unreadable or not a regular file.
pub fn hash_file(path: &Path) -> Option<String> {
    fingerprint_file(path).map(|fp| fp.digest)
}

/// SHA-256 of bytes already in memory, in the same form as [`hash_file`].
pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn fingerprint_file(path: &Path) -> Option<FileFingerprint> {
    if !path.is_file() {
        return None;
    }

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "hash_unavailable");
            return None;
        }
    };

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK_BYTES];
    let mut size_bytes = 0u64;
    let mut newlines = 0usize;
    let mut last_byte = None;

    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "hash_unavailable");
                return None;
            }
        };
        let chunk = &buffer[..read];
        hasher.update(chunk);
        size_bytes += read as u64;
        newlines += chunk.iter().filter(|b| **b == b'\n').count();
        last_byte = chunk.last().copied();
    }

    // Same convention as `str::lines`: a trailing newline does not open a new line.
    let line_count = match last_byte {
        None => 0,
        Some(b'\n') => newlines,
        Some(_) => newlines + 1,
    };

    Some(FileFingerprint {
        digest: format!("{:x}", hasher.finalize()),
        size_bytes,
        line_count,
    })
}

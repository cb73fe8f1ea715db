//! SHA-256 content hashing for asset verification

use crate::error::{BundleCacheError, BundleCacheResult};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Read buffer for streaming hashes (64 KiB)
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hash a byte slice, returning lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash a file's contents without loading it into memory
///
/// Returns `Ok(None)` if the file does not exist.
pub async fn hash_file(path: &Path) -> BundleCacheResult<Option<String>> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(BundleCacheError::io(
                format!("opening {}", path.display()),
                e,
            ))
        }
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| BundleCacheError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Some(hex::encode(hasher.finalize())))
}

/// Compare two hex digests ignoring case
pub fn hashes_match(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}

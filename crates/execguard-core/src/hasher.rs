//! Content fingerprints.
//!
//! Every file gets a SHA-256 digest (identity) and an MD5 digest kept for
//! older baselines and analysis pipelines that still key on it. Both are
//! computed in one streaming pass.

use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

pub const PRIMARY_HASH_LABEL: &str = "SHA256";
pub const SECONDARY_HASH_LABEL: &str = "MD5";

const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileDigests {
    /// Upper-case hex SHA-256.
    pub primary: String,
    /// Upper-case hex MD5.
    pub secondary: String,
}

/// Hash a file's content with both digests.
pub fn hash_file(path: &Path) -> io::Result<FileDigests> {
    let file = File::open(path)?;
    hash_reader(file)
}

pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<FileDigests> {
    let mut sha = Sha256::new();
    let mut md5 = Md5::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        sha.update(&buffer[..n]);
        md5.update(&buffer[..n]);
    }
    Ok(FileDigests {
        primary: hex::encode_upper(sha.finalize()),
        secondary: hex::encode_upper(md5.finalize()),
    })
}

/// Digests for a file that may have disappeared; empty strings when unreadable.
pub fn hash_file_or_empty(path: &Path) -> FileDigests {
    hash_file(path).unwrap_or_default()
}

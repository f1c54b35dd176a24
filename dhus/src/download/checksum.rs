//! Streaming checksum calculation for archive verification.
//!
//! The catalog declares an algorithm-tagged content hash per product
//! (MD5 in practice, SHA-256 tolerated). Verification streams the file in
//! bounded chunks so archives of any size can be checked without loading
//! them into memory. A mismatch is a normal `false` result, not an error;
//! only I/O failures propagate.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::error::{ClientError, ClientResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Hash algorithm declared by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Parse the server's algorithm tag, e.g. `MD5` or `SHA-256`.
    ///
    /// Returns `None` for algorithms this client cannot compute.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "MD5" => Some(Self::Md5),
            "SHA256" | "SHA-256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5 => write!(f, "MD5"),
            Self::Sha256 => write!(f, "SHA-256"),
        }
    }
}

/// An expected content hash, as declared in product metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    /// Hex digest; case is not significant.
    pub value: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into(),
        }
    }
}

/// Calculate the content hash of a file as lowercase hex.
pub fn compute_file_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> ClientResult<String> {
    let file = File::open(path).map_err(|e| ClientError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    match algorithm {
        ChecksumAlgorithm::Md5 => digest_reader::<Md5>(file, path),
        ChecksumAlgorithm::Sha256 => digest_reader::<Sha256>(file, path),
    }
}

/// Verify a file against an expected checksum.
///
/// The comparison is case-insensitive since servers return upper- or
/// lower-case hex.
pub fn verify_file(path: &Path, expected: &Checksum) -> ClientResult<bool> {
    let actual = compute_file_checksum(path, expected.algorithm)?;
    Ok(actual.eq_ignore_ascii_case(&expected.value))
}

fn digest_reader<D: Digest>(mut file: File, path: &Path) -> ClientResult<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| ClientError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    Ok(hex)
}

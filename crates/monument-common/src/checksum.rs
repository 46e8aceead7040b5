//! SHA-256 content digests
//!
//! Uploaded files are keyed by the hex digest of their bytes, so the same
//! session file uploaded twice under different names resolves to one record.

use crate::error::{CommonError, Result};
use sha2::{Digest, Sha256};

/// Digest an in-memory buffer
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify that `data` hashes to `expected` (case-insensitive hex)
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_bytes(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_bytes() {
        assert_eq!(sha256_bytes(b"hello world"), HELLO_WORLD);
    }

    #[test]
    fn test_verify_sha256() {
        assert!(verify_sha256(b"hello world", &HELLO_WORLD.to_uppercase()).is_ok());
        assert!(matches!(
            verify_sha256(b"hello", HELLO_WORLD),
            Err(CommonError::ChecksumMismatch { .. })
        ));
    }
}

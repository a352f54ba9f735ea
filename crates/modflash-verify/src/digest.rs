//! SHA-256 digest computation and comparison

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::VerifyError;

const READ_BUFFER_SIZE: usize = 8192;

/// Compute the lower-case hex SHA-256 of `data`
pub fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check `data` against an expected hex digest
///
/// `None` means the source publishes no digest and verification is skipped.
/// The comparison ignores ASCII case.
///
/// # Errors
///
/// Returns [`VerifyError::Mismatch`] carrying both digests when they differ.
pub fn verify(data: &[u8], expected: Option<&str>) -> Result<(), VerifyError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let actual = digest(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(VerifyError::Mismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Compute the SHA-256 of a file without loading it into memory
///
/// # Errors
///
/// Returns [`VerifyError::Io`] if the file cannot be opened or read.
pub async fn digest_file(path: &Path) -> Result<String, VerifyError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(buffer.get(..bytes_read).unwrap_or_default());
    }

    Ok(hex::encode(hasher.finalize()))
}

//! Snapshot tests for operator-facing manifest errors.

use insta::assert_snapshot;
use modflash_manifest::ManifestError;

#[test]
fn test_missing_channels() {
    assert_snapshot!(
        ManifestError::malformed("missing `channels` mapping").to_string(),
        @"Malformed manifest: missing `channels` mapping"
    );
}

#[test]
fn test_invalid_file() {
    let err = ManifestError::InvalidFile {
        channel: "beta".to_string(),
        version: "2.0".to_string(),
        file: "../fw.bin".to_string(),
    };
    assert_snapshot!(err.to_string(), @"Invalid firmware path '../fw.bin' for beta/2.0");
}

#[test]
fn test_invalid_digest() {
    let err = ManifestError::InvalidDigest {
        channel: "stable".to_string(),
        version: "1.0".to_string(),
        digest: "abc".to_string(),
    };
    assert_snapshot!(
        err.to_string(),
        @"Invalid sha256 for stable/1.0: expected 64 hex characters, got 'abc'"
    );
}

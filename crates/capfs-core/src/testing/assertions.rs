//! Content assertions that stay readable for multi-megabyte payloads.

use sha2::{Digest, Sha256};

/// Calculate SHA-256 hash of data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Assert that two byte slices are equal.
///
/// On failure, shows sizes and the first differing position rather than
/// dumping the buffers.
pub fn assert_bytes_equal(actual: &[u8], expected: &[u8], context: &str) {
    assert!(
        actual.len() == expected.len(),
        "{context}: size mismatch - expected {} bytes, got {} bytes",
        expected.len(),
        actual.len()
    );

    if let Some((i, (a, e))) = actual
        .iter()
        .zip(expected.iter())
        .enumerate()
        .find(|(_, (a, e))| a != e)
    {
        panic!("{context}: content mismatch at byte {i} - expected 0x{e:02x}, got 0x{a:02x}");
    }
}

/// Assert that data's SHA-256 hash matches expected.
pub fn assert_hash_equal(actual: &[u8], expected_hash: &[u8; 32], context: &str) {
    let actual_hash = sha256(actual);
    assert!(
        &actual_hash == expected_hash,
        "{context}: hash mismatch\n  expected: {expected_hash:02x?}\n  got:      {actual_hash:02x?}\n  (data size: {} bytes)",
        actual.len()
    );
}

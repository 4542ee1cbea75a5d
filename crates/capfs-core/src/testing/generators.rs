//! Test data generators.
//!
//! Sizes are chosen around the transfer engine's streaming threshold so that
//! tests exercise both the buffered and the streamed write paths.

use rand::Rng;

/// Size at which transfers switch from buffered to streamed writes (1 MiB).
pub const STREAM_THRESHOLD: usize = 1024 * 1024;

/// Generate random bytes of specified size.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..size).map(|_| rng.random()).collect()
}

/// Deterministic content of the given size.
///
/// Cheaper than [`random_bytes`] for multi-megabyte files; the byte pattern
/// has a prime period so chunk reordering is still detectable.
// Safe cast: modulo 251 always fits in u8
#[allow(clippy::cast_possible_truncation)]
pub fn patterned_bytes(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Small file content (2 KiB), well under the threshold.
pub fn small_file_content() -> Vec<u8> {
    random_bytes(2 * 1024)
}

/// Content one byte under the threshold.
pub fn threshold_minus_one() -> Vec<u8> {
    patterned_bytes(STREAM_THRESHOLD - 1)
}

/// Content exactly at the threshold (streamed).
pub fn threshold_content() -> Vec<u8> {
    patterned_bytes(STREAM_THRESHOLD)
}

/// Content spanning `mib` mebibytes, for the streamed path.
pub fn large_file_content(mib: usize) -> Vec<u8> {
    patterned_bytes(mib * STREAM_THRESHOLD)
}

/// Generate a filename with Unicode characters.
pub fn unicode_filename() -> String {
    "\u{6587}\u{4ef6}-\u{3b1}\u{3b2}\u{3b3}-emoji\u{1f389}.txt".to_string()
}

/// Generate a filename with special characters.
pub fn special_filename() -> String {
    "file with spaces & (special) chars!.txt".to_string()
}

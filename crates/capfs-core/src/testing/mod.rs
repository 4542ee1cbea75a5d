//! Testing utilities for bridge and transfer tests.
//!
//! - **Memory backend**: [`MemoryDirectory`] / [`MemoryFile`] handles with a
//!   controllable [`PermissionGate`], plus a [`MemoryObserverFactory`] whose
//!   change records are injected by the test
//! - **Generators**: threshold-aware test data
//! - **Assertions**: content verification with helpful error messages
//!
//! # Usage
//!
//! ```ignore
//! use capfs_core::testing::{MemoryDirectory, large_file_content, assert_bytes_equal};
//!
//! let root = MemoryDirectory::new_root("project");
//! root.add_file("big.bin", large_file_content(2));
//! ```

pub mod assertions;
pub mod generators;
pub mod memory;

pub use assertions::{assert_bytes_equal, assert_hash_equal, sha256};
pub use generators::{
    STREAM_THRESHOLD, large_file_content, patterned_bytes, random_bytes,
    small_file_content, special_filename, threshold_content, threshold_minus_one,
    unicode_filename,
};
pub use memory::{
    DEFAULT_NATIVE_CHUNK, MemoryDirectory, MemoryFile, MemoryObserverFactory, MemoryOptions,
    PermissionGate,
};

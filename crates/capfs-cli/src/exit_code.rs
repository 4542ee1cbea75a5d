//! Process exit codes.
//!
//! Usage errors exit with 2 (clap's own code).

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
pub const NOT_FOUND: u8 = 3;
pub const ALREADY_EXISTS: u8 = 4;
pub const PERMISSION_DENIED: u8 = 5;
/// A transfer finished but some entries failed.
pub const INCOMPLETE: u8 = 6;
pub const CANCELLED: u8 = 130;

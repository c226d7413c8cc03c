//! Stable exit codes for envman CLI commands.

/// Command succeeded (or `check-admin` found elevated privileges).
pub const OK: i32 = 0;
/// Command failed: registry read/write error, bad config, malformed data.
pub const FAILED: i32 = 1;
/// A registry write or delete was refused for lack of privileges.
pub const PERMISSION_DENIED: i32 = 2;
/// `envman check-admin` found the process is not elevated.
pub const NOT_ELEVATED: i32 = 3;

//! Per-scope environment variable management with a local preference layer.
//!
//! The crate talks to the platform registry through an external control-plane
//! tool (`reg.exe`) and keeps three small versioned stores next to it:
//! per-variable value history ("alternatives"), named variable groups with
//! value "schemes", and application settings.
//!
//! - **[`core`]**: Pure, deterministic logic (scope normalization, registry text
//!   parsing, denial classification, bucket ordering). No I/O.
//! - **[`io`]**: Side-effecting operations (process execution, durable key/value
//!   storage, the stores themselves). Isolated behind traits for tests.
//!
//! [`apply`] coordinates the registry with the stores for multi-step commands.

pub mod apply;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

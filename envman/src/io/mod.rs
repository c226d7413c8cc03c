//! I/O: the registry tool, durable storage, and the stores built on it.

pub mod alternatives;
pub mod clock;
pub mod config;
pub mod groups;
pub mod ids;
pub mod kv;
pub mod persist;
pub mod process;
pub mod registry;
pub mod settings;
pub mod transfer;

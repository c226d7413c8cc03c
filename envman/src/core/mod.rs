//! Deterministic, pure logic shared by the registry layer and the stores.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod alternative;
pub mod classify;
pub mod parser;
pub mod scope;

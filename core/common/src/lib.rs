//! Common utilities and types shared across Conduit crates.
//!
//! This crate provides the error taxonomy and the small value types that
//! cross the boundary between callers, the transfer core, and backends.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ObjectPath, TransferOptions};

//! Storage provider abstraction for Conduit.
//!
//! This crate provides a trait-based interface for storage backends
//! (local filesystem, HTTP/WebDAV servers, in-memory stores), a registry
//! that builds them by name, and the copy/move logic that moves objects
//! between any two of them.
//!
//! # Design Principles
//! - Provider isolation: callers never branch on the backend type
//! - Async operations: all I/O operations are async
//! - Streaming support: payloads flow through [`StreamObject`] chunk by chunk
//! - Native first: copy/move use a backend's own operation when it offers
//!   one and stream through this process otherwise

pub mod http;
pub mod local;
pub mod memory;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod stream;

pub use http::{HttpConfig, HttpProvider};
pub use local::{guess_content_type, LocalConfig, LocalProvider};
pub use memory::{MemoryConfig, MemoryProvider};
pub use provider::{Backend, Metadata, Provider};
pub use registry::{create, global, register_builtin, Constructor, ProviderRegistry};
pub use stream::{ByteStream, StreamObject, StreamWriter, DEFAULT_CONTENT_TYPE};

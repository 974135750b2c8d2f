//! Storage boundary
//!
//! # Architecture
//!
//! The crate never runs queries itself. It talks to storage through three
//! narrow traits:
//!
//! - [`QuerySink`]: receives compiled scopes, predicates, sorts and ranges
//! - [`StorageQuery`]: a sink that can be executed into records
//! - [`RecordSource`]: loads single records by identifier, used when
//!   relationship targets are pulled into a document
//!
//! [`MemoryStore`] implements all of them over an in-memory record set. It
//! serves tests, the CLI, and any caller small enough not to need a real
//! engine.

pub mod engine;
pub mod memory;

pub use engine::{QuerySink, Record, RecordSource, StorageQuery};
pub use memory::{MemoryQuery, MemoryStore};

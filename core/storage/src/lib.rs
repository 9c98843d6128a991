//! Revisioned document database abstraction for the expenses store.
//!
//! This module provides a trait-based interface over a document database
//! with optimistic per-document revisions, plus three engines:
//! - `memory`: named in-process collections (tests, in-process replication)
//! - `sqlite`: one SQLite file per collection
//! - `http`: a CouchDB-compatible server (replication peer)
//!
//! # Design Principles
//! - Engine isolation: no engine-specific logic leaks into the store layer
//! - Async operations: all I/O operations are async
//! - Unified error semantics: missing ids are `NotFound`, stale revisions are `Conflict`

pub mod database;
pub mod engine;
pub mod http;
pub mod memory;
pub mod sqlite;

pub use database::{Backend, BulkWriteOutcome, DatabaseInfo, DocumentDatabase, ListOptions};
pub use engine::{resolve_backend, Engine};
pub use http::{Credentials, HttpBackend, HttpDatabase};
pub use memory::{MemoryBackend, MemoryDatabase};
pub use sqlite::{SqliteBackend, SqliteDatabase};

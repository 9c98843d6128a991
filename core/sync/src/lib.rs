//! Expenses replication
//!
//! This module provides one-shot bidirectional replication between two
//! revisioned document collections:
//! - Revision-based winner selection (generation first, then hash)
//! - Concurrent push and pull over a single snapshot of both sides
//! - A report of documents sent and received
//!
//! Documents are replicated as stored. Encrypted collections stay encrypted
//! on the peer, mark document included.

pub mod conflict;
pub mod engine;

pub use conflict::{winning_changes, RevisionIndex};
pub use engine::{replicate, ReplicationConfig, ReplicationReport, Replicator};

//! facegate-store: durable identifier → (name, descriptor) mapping.
//!
//! [`DescriptorStore`] is the contract the daemon depends on;
//! [`SqliteStore`] is the SQLite-backed implementation.

mod migrations;
pub mod sqlite;

use facegate_core::{Candidate, Descriptor, DescriptorError, PersonRecord};
use thiserror::Error;

pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("stored descriptor for {identifier} is corrupt: {source}")]
    Corrupt {
        identifier: String,
        #[source]
        source: DescriptorError,
    },
}

/// Whether an upsert created a new person or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Created => "created",
            UpsertOutcome::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Upserted {
    pub record: PersonRecord,
    pub outcome: UpsertOutcome,
}

/// Person/descriptor persistence.
///
/// Implementations must be safe for concurrent use. Upserts for the same
/// identifier serialize; readers never observe a half-written record.
pub trait DescriptorStore: Send + Sync {
    /// Insert or replace the record keyed by `identifier`. The record `id`
    /// is assigned on first insert and kept on every later update.
    fn upsert(&self, identifier: &str, display_name: &str, descriptor: &Descriptor) -> Result<Upserted, StoreError>;

    /// Snapshot of every record in insertion order.
    fn all(&self) -> Result<Vec<Candidate>, StoreError>;

    fn find_by_identifier(&self, identifier: &str) -> Result<Option<PersonRecord>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

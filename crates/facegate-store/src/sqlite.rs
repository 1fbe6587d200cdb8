use crate::migrations::{Migration, MIGRATIONS};
use crate::{DescriptorStore, StoreError, UpsertOutcome, Upserted};
use facegate_core::{Candidate, Descriptor, DescriptorError, PersonRecord};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed [`DescriptorStore`].
///
/// A single connection behind a mutex: every write runs in an IMMEDIATE
/// transaction, so concurrent upserts for one identifier serialize and a
/// reader sees either the old or the new row.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if path == Path::new(":memory:") {
            return Self::open_in_memory();
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::info!(path = %path.display(), journal_mode = %mode, "descriptor store opened");

        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, StoreError> {
        apply_migrations(&mut conn, MIGRATIONS)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Apply pending migrations in one IMMEDIATE transaction.
///
/// The applied set is read under the write lock, so two processes opening a
/// fresh database cannot both run the same migration, and a crash part way
/// leaves the schema untouched.
fn apply_migrations(conn: &mut Connection, migrations: &[Migration]) -> Result<(), StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let applied: Vec<u32> = {
        let mut stmt = tx.prepare("SELECT version FROM schema_migrations")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    for migration in migrations.iter().filter(|m| !applied.contains(&m.version)) {
        tracing::info!(version = migration.version, name = migration.name, "applying store migration");
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, chrono::Utc::now().to_rfc3339()],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Decode the descriptor column without failing the whole row.
fn read_descriptor(value: ValueRef<'_>) -> Result<Descriptor, DescriptorError> {
    match value {
        ValueRef::Blob(bytes) => Descriptor::from_le_bytes(bytes),
        ValueRef::Null => Err(DescriptorError::NotBlob("null")),
        ValueRef::Integer(_) => Err(DescriptorError::NotBlob("integer")),
        ValueRef::Real(_) => Err(DescriptorError::NotBlob("real")),
        ValueRef::Text(_) => Err(DescriptorError::NotBlob("text")),
    }
}

impl DescriptorStore for SqliteStore {
    fn upsert(&self, identifier: &str, display_name: &str, descriptor: &Descriptor) -> Result<Upserted, StoreError> {
        let blob = descriptor.to_le_bytes();
        let now = chrono::Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT id, created_at FROM persons WHERE identifier = ?1",
                params![identifier],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (id, created_at, outcome) = match existing {
            Some((id, created_at)) => {
                tx.execute(
                    "UPDATE persons SET display_name = ?2, descriptor = ?3, updated_at = ?4 WHERE identifier = ?1",
                    params![identifier, display_name, blob, now],
                )?;
                (id, created_at, UpsertOutcome::Updated)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO persons (id, identifier, display_name, descriptor, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![id, identifier, display_name, blob, now],
                )?;
                (id, now.clone(), UpsertOutcome::Created)
            }
        };
        tx.commit()?;

        tracing::debug!(identifier, %id, outcome = outcome.as_str(), "person upserted");

        Ok(Upserted {
            record: PersonRecord {
                id,
                identifier: identifier.to_string(),
                display_name: display_name.to_string(),
                descriptor: descriptor.clone(),
                created_at,
                updated_at: now,
            },
            outcome,
        })
    }

    fn all(&self) -> Result<Vec<Candidate>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT identifier, display_name, descriptor FROM persons ORDER BY seq")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Candidate {
                    identifier: row.get(0)?,
                    display_name: row.get(1)?,
                    descriptor: read_descriptor(row.get_ref(2)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn find_by_identifier(&self, identifier: &str) -> Result<Option<PersonRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, identifier, display_name, descriptor, created_at, updated_at
                 FROM persons WHERE identifier = ?1",
                params![identifier],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        read_descriptor(row.get_ref(3)?),
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, identifier, display_name, descriptor, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let descriptor = descriptor.map_err(|source| StoreError::Corrupt {
            identifier: identifier.clone(),
            source,
        })?;

        Ok(Some(PersonRecord {
            id,
            identifier,
            display_name,
            descriptor,
            created_at,
            updated_at,
        }))
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

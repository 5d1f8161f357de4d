//! Transcript and dictionary persistence
//!
//! Thin owner-scoped stores over SQLite. Every operation takes the
//! owner id and never returns or mutates another owner's rows; a
//! cross-owner lookup is indistinguishable from a missing record.

use crate::config::DictionaryConflictPolicy;
use crate::correction::CorrectionRule;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// A finalized transcript row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRecord {
    pub id: String,
    pub owner_id: String,
    pub text: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One dictionary row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryEntry {
    pub id: String,
    pub owner_id: String,
    pub phrase: String,
    pub correction: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Durable store of finalized transcripts, scoped to an owner.
pub trait TranscriptStore: Send + Sync {
    fn create(&self, owner: &str, text: &str) -> Result<TranscriptRecord, StoreError>;
    fn list_recent(&self, owner: &str, limit: u32) -> Result<Vec<TranscriptRecord>, StoreError>;
    fn get(&self, owner: &str, id: &str) -> Result<TranscriptRecord, StoreError>;
    fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError>;
}

/// CRUD for a user's phrase -> correction rules.
///
/// Invariant: `(owner, phrase)` is unique, phrase compared
/// case-insensitively. What a duplicate write does is decided by the
/// configured conflict policy.
pub trait DictionaryStore: Send + Sync {
    fn list(&self, owner: &str) -> Result<Vec<DictionaryEntry>, StoreError>;
    fn rules(&self, owner: &str) -> Result<Vec<CorrectionRule>, StoreError>;
    fn create(
        &self,
        owner: &str,
        phrase: &str,
        correction: &str,
    ) -> Result<DictionaryEntry, StoreError>;
    fn update(
        &self,
        owner: &str,
        id: &str,
        phrase: &str,
        correction: &str,
    ) -> Result<DictionaryEntry, StoreError>;
    fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError>;
}

/// SQLite-backed implementation of both stores.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    conflict_policy: DictionaryConflictPolicy,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run the schema.
    pub fn open(path: &Path, conflict_policy: DictionaryConflictPolicy) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
                info!("Created database directory: {:?}", parent);
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;
        info!("Opened database at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            conflict_policy,
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory(conflict_policy: DictionaryConflictPolicy) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            conflict_policy,
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS transcripts (
                id         TEXT PRIMARY KEY,
                owner_id   TEXT NOT NULL,
                text       TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transcripts_owner
                ON transcripts (owner_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS dictionary (
                id         TEXT PRIMARY KEY,
                owner_id   TEXT NOT NULL,
                phrase     TEXT NOT NULL,
                correction TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_dictionary_owner_phrase
                ON dictionary (owner_id, lower(phrase));",
        )?;
        Ok(())
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }
}

fn row_to_transcript(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranscriptRecord> {
    Ok(TranscriptRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        text: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<DictionaryEntry> {
    Ok(DictionaryEntry {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        phrase: row.get(2)?,
        correction: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl TranscriptStore for SqliteStore {
    fn create(&self, owner: &str, text: &str) -> Result<TranscriptRecord, StoreError> {
        let record = TranscriptRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.to_string(),
            text: text.to_string(),
            created_at: Self::now(),
            updated_at: Self::now(),
        };
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO transcripts (id, owner_id, text, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.owner_id,
                record.text,
                record.created_at,
                record.updated_at
            ],
        )?;
        Ok(record)
    }

    fn list_recent(&self, owner: &str, limit: u32) -> Result<Vec<TranscriptRecord>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, text, created_at, updated_at FROM transcripts
             WHERE owner_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![owner, limit], row_to_transcript)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get(&self, owner: &str, id: &str) -> Result<TranscriptRecord, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT id, owner_id, text, created_at, updated_at FROM transcripts
             WHERE owner_id = ?1 AND id = ?2",
            params![owner, id],
            row_to_transcript,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let changed = conn.execute(
            "DELETE FROM transcripts WHERE owner_id = ?1 AND id = ?2",
            params![owner, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

impl DictionaryStore for SqliteStore {
    fn list(&self, owner: &str) -> Result<Vec<DictionaryEntry>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, phrase, correction, created_at, updated_at FROM dictionary
             WHERE owner_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![owner], row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn rules(&self, owner: &str) -> Result<Vec<CorrectionRule>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT phrase, correction FROM dictionary WHERE owner_id = ?1 LIMIT 1000",
        )?;
        let rows = stmt.query_map(params![owner], |row| {
            Ok(CorrectionRule {
                phrase: row.get(0)?,
                correction: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn create(
        &self,
        owner: &str,
        phrase: &str,
        correction: &str,
    ) -> Result<DictionaryEntry, StoreError> {
        let phrase = phrase.trim();
        let correction = correction.trim();
        if phrase.is_empty() || correction.is_empty() {
            return Err(StoreError::InvalidEntry);
        }

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM dictionary WHERE owner_id = ?1 AND lower(phrase) = lower(?2)",
                params![owner, phrase],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_id) = existing {
            match self.conflict_policy {
                DictionaryConflictPolicy::Reject => return Err(StoreError::PhraseConflict),
                DictionaryConflictPolicy::Overwrite => {
                    let now = Self::now();
                    conn.execute(
                        "UPDATE dictionary SET phrase = ?1, correction = ?2, updated_at = ?3
                         WHERE owner_id = ?4 AND id = ?5",
                        params![phrase, correction, now, owner, existing_id],
                    )?;
                    return conn
                        .query_row(
                            "SELECT id, owner_id, phrase, correction, created_at, updated_at
                             FROM dictionary WHERE owner_id = ?1 AND id = ?2",
                            params![owner, existing_id],
                            row_to_entry,
                        )
                        .map_err(StoreError::from);
                }
            }
        }

        let entry = DictionaryEntry {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.to_string(),
            phrase: phrase.to_string(),
            correction: correction.to_string(),
            created_at: Self::now(),
            updated_at: Self::now(),
        };
        conn.execute(
            "INSERT INTO dictionary (id, owner_id, phrase, correction, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.owner_id,
                entry.phrase,
                entry.correction,
                entry.created_at,
                entry.updated_at
            ],
        )?;
        Ok(entry)
    }

    fn update(
        &self,
        owner: &str,
        id: &str,
        phrase: &str,
        correction: &str,
    ) -> Result<DictionaryEntry, StoreError> {
        let phrase = phrase.trim();
        let correction = correction.trim();
        if phrase.is_empty() || correction.is_empty() {
            return Err(StoreError::InvalidEntry);
        }

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        // Renaming onto another entry's phrase is always a conflict,
        // regardless of the create policy.
        let clash: Option<String> = conn
            .query_row(
                "SELECT id FROM dictionary
                 WHERE owner_id = ?1 AND lower(phrase) = lower(?2) AND id != ?3",
                params![owner, phrase, id],
                |row| row.get(0),
            )
            .optional()?;
        if clash.is_some() {
            return Err(StoreError::PhraseConflict);
        }

        let now = Self::now();
        let changed = conn.execute(
            "UPDATE dictionary SET phrase = ?1, correction = ?2, updated_at = ?3
             WHERE owner_id = ?4 AND id = ?5",
            params![phrase, correction, now, owner, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        conn.query_row(
            "SELECT id, owner_id, phrase, correction, created_at, updated_at
             FROM dictionary WHERE owner_id = ?1 AND id = ?2",
            params![owner, id],
            row_to_entry,
        )
        .map_err(StoreError::from)
    }

    fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let changed = conn.execute(
            "DELETE FROM dictionary WHERE owner_id = ?1 AND id = ?2",
            params![owner, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// Storage errors with contextual information.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("This phrase already exists in your dictionary")]
    PhraseConflict,

    #[error("Phrase and correction are required")]
    InvalidEntry,

    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

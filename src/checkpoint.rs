//! SQLite-backed checkpoint storage for [`TurnState`] (feature `persistence`).
//!
//! Grounded on the teacher's `storage::sqlite::SqliteStorage` (open/`init`/
//! schema-versioning shape): here the schema shrinks to a single key-value
//! table keyed by turn id, storing the whole `TurnState` as JSON rather than
//! a normalized buffer/chunk hierarchy.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{CheckpointError, Result};
use crate::state::TurnState;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS checkpoints (
    turn_id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Persists [`TurnState`] snapshots to a `SQLite` database, keyed by
/// [`TurnState::turn_id`].
///
/// # Examples
///
/// ```no_run
/// use rag_orchestrator::checkpoint::SqliteCheckpointStore;
///
/// let store = SqliteCheckpointStore::open("turns.db").unwrap();
/// ```
pub struct SqliteCheckpointStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteCheckpointStore {
    /// Opens or creates a checkpoint database at `path`, creating the
    /// schema if absent.
    ///
    /// # Errors
    ///
    /// Returns a [`CheckpointError::Database`] if the file cannot be opened
    /// or the schema cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| CheckpointError::Database(err.to_string()))?;
            }
        }
        let conn = Connection::open(&path).map_err(CheckpointError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(CheckpointError::from)?;
        Ok(Self { conn, path: Some(path) })
    }

    /// Opens an in-memory checkpoint database. Useful for tests and the CLI
    /// demonstrator's ephemeral runs.
    ///
    /// # Errors
    ///
    /// Returns a [`CheckpointError::Database`] if the schema cannot be
    /// created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(CheckpointError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(CheckpointError::from)?;
        Ok(Self { conn, path: None })
    }

    /// The backing file path, or `None` for an in-memory store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Saves `state`, replacing any existing checkpoint for the same turn
    /// id.
    ///
    /// # Errors
    ///
    /// Returns a [`CheckpointError::Serialization`] if `state` cannot be
    /// encoded as JSON, or a [`CheckpointError::Database`] if the write
    /// fails.
    pub fn save(&self, state: &TurnState) -> Result<()> {
        let data = serde_json::to_string(state).map_err(CheckpointError::from)?;
        let now = now();
        self.conn
            .execute(
                r"
                INSERT INTO checkpoints (turn_id, data, created_at, updated_at)
                VALUES (?1, ?2, COALESCE((SELECT created_at FROM checkpoints WHERE turn_id = ?1), ?3), ?3)
                ON CONFLICT(turn_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
                ",
                params![state.turn_id, data, now],
            )
            .map_err(CheckpointError::from)?;
        Ok(())
    }

    /// Loads the checkpoint for `turn_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns a [`CheckpointError::Database`] if the query fails, or a
    /// [`CheckpointError::Serialization`] if the stored JSON is corrupt.
    pub fn load(&self, turn_id: &str) -> Result<Option<TurnState>> {
        let data: Option<String> = self
            .conn
            .query_row("SELECT data FROM checkpoints WHERE turn_id = ?1", params![turn_id], |row| row.get(0))
            .optional()
            .map_err(CheckpointError::from)?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(CheckpointError::from)?)),
            None => Ok(None),
        }
    }

    /// Loads the checkpoint for `turn_id`, failing if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::NotFound`] if no checkpoint is stored for
    /// `turn_id`.
    pub fn require(&self, turn_id: &str) -> Result<TurnState> {
        self.load(turn_id)?.ok_or_else(|| CheckpointError::NotFound { turn_id: turn_id.to_string() }.into())
    }

    /// Deletes the checkpoint for `turn_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns a [`CheckpointError::Database`] if the delete fails.
    pub fn delete(&self, turn_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM checkpoints WHERE turn_id = ?1", params![turn_id])
            .map_err(CheckpointError::from)?;
        Ok(())
    }

    /// Lists every stored turn id, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns a [`CheckpointError::Database`] if the query fails.
    pub fn list_turn_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT turn_id FROM checkpoints ORDER BY updated_at DESC")
            .map_err(CheckpointError::from)?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(CheckpointError::from)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(CheckpointError::from)?;
        Ok(ids)
    }
}

#[allow(clippy::cast_possible_wrap)]
fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(turn_id: &str) -> TurnState {
        let mut state = TurnState::new("what is the warranty period", 3);
        state.turn_id = turn_id.to_string();
        state
    }

    #[test]
    fn test_save_and_load_round_trips() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let state = sample("turn-1");
        store.save(&state).unwrap();
        let loaded = store.load("turn-1").unwrap().unwrap();
        assert_eq!(loaded.turn_id, "turn-1");
        assert_eq!(loaded.query, "what is the warranty period");
    }

    #[test]
    fn test_load_missing_returns_none() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        assert!(store.load("no-such-turn").unwrap().is_none());
    }

    #[test]
    fn test_require_missing_errors() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let err = store.require("no-such-turn").unwrap_err();
        assert!(err.to_string().contains("no-such-turn"));
    }

    #[test]
    fn test_save_overwrites_existing_checkpoint() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.save(&sample("turn-1")).unwrap();
        let mut updated = sample("turn-1");
        updated.query = "updated query".to_string();
        store.save(&updated).unwrap();
        let loaded = store.load("turn-1").unwrap().unwrap();
        assert_eq!(loaded.query, "updated query");
    }

    #[test]
    fn test_delete_removes_checkpoint() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.save(&sample("turn-1")).unwrap();
        store.delete("turn-1").unwrap();
        assert!(store.load("turn-1").unwrap().is_none());
    }

    #[test]
    fn test_open_creates_parent_dirs_and_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("turns.db");

        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store.save(&sample("turn-1")).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
        }

        let reopened = SqliteCheckpointStore::open(&path).unwrap();
        let loaded = reopened.load("turn-1").unwrap().unwrap();
        assert_eq!(loaded.turn_id, "turn-1");
    }

    #[test]
    fn test_list_turn_ids_orders_most_recent_first() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.save(&sample("turn-1")).unwrap();
        store.save(&sample("turn-2")).unwrap();
        let ids = store.list_turn_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"turn-1".to_string()));
        assert!(ids.contains(&"turn-2".to_string()));
    }
}

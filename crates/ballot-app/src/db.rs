// SQLite persistence layer: command journal, event log, and key-value state.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use ballot_core::{Command, EventRecord, ParticipantId};

/// One accepted command as written to the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub seq: u64,
    pub caller: ParticipantId,
    pub command: Command,
}

/// SQLite-backed persistence for a ballot's accepted commands and emitted
/// events, scoped by ballot id.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS commands (
                seq         INTEGER NOT NULL,
                ballot_id   TEXT NOT NULL,
                caller      TEXT NOT NULL,
                command     TEXT NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (ballot_id, seq)
            );

            CREATE TABLE IF NOT EXISTS events (
                seq         INTEGER NOT NULL,
                ballot_id   TEXT NOT NULL,
                event       TEXT NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (ballot_id, seq)
            );

            CREATE TABLE IF NOT EXISTS ballot_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Journal an accepted command together with the event it produced, in
    /// one transaction. The journal sequence is the event's sequence, since
    /// every accepted command emits exactly one event.
    ///
    /// Uses INSERT OR IGNORE so re-recording the same sequence is a no-op.
    pub fn record_applied(
        &self,
        ballot_id: &str,
        caller: &ParticipantId,
        command: &Command,
        record: &EventRecord,
    ) -> Result<()> {
        let command_json =
            serde_json::to_string(command).context("failed to serialize command")?;
        let event_json =
            serde_json::to_string(&record.event).context("failed to serialize event")?;

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "INSERT OR IGNORE INTO commands (seq, ballot_id, caller, command)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.seq, ballot_id, caller.as_str(), command_json],
        )
        .context("failed to journal command")?;
        tx.execute(
            "INSERT OR IGNORE INTO events (seq, ballot_id, event) VALUES (?1, ?2, ?3)",
            params![record.seq, ballot_id, event_json],
        )
        .context("failed to record event")?;
        tx.commit().context("failed to commit applied command")?;
        Ok(())
    }

    /// Load the command journal for a ballot, ordered by sequence.
    pub fn load_journal(&self, ballot_id: &str) -> Result<Vec<JournalEntry>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT seq, caller, command FROM commands
                 WHERE ballot_id = ?1 ORDER BY seq",
            )
            .context("failed to prepare load_journal query")?;

        let rows = stmt
            .query_map(params![ballot_id], |row| {
                let seq: u64 = row.get(0)?;
                let caller: String = row.get(1)?;
                let command: String = row.get(2)?;
                Ok((seq, caller, command))
            })
            .context("failed to query command journal")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map command journal rows")?;

        rows.into_iter()
            .map(|(seq, caller, command_json)| {
                let command: Command = serde_json::from_str(&command_json)
                    .with_context(|| format!("corrupt journal entry {seq}"))?;
                Ok(JournalEntry {
                    seq,
                    caller: ParticipantId::new(caller),
                    command,
                })
            })
            .collect()
    }

    /// Load events for a ballot with a sequence greater than `after_seq`.
    pub fn load_events(&self, ballot_id: &str, after_seq: u64) -> Result<Vec<EventRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT seq, event FROM events
                 WHERE ballot_id = ?1 AND seq > ?2 ORDER BY seq",
            )
            .context("failed to prepare load_events query")?;

        let rows = stmt
            .query_map(params![ballot_id, after_seq], |row| {
                let seq: u64 = row.get(0)?;
                let event: String = row.get(1)?;
                Ok((seq, event))
            })
            .context("failed to query events")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map event rows")?;

        rows.into_iter()
            .map(|(seq, event_json)| {
                let event = serde_json::from_str(&event_json)
                    .with_context(|| format!("corrupt event {seq}"))?;
                Ok(EventRecord { seq, event })
            })
            .collect()
    }

    /// Returns `true` if at least one command has been journaled for the
    /// given ballot.
    pub fn has_ballot_in_progress(&self, ballot_id: &str) -> Result<bool> {
        let conn = self.conn();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM commands WHERE ballot_id = ?1)",
                params![ballot_id],
                |row| row.get(0),
            )
            .context("failed to check command journal existence")?;
        Ok(exists)
    }

    /// Persist an arbitrary JSON value under `key`. Uses INSERT OR REPLACE so
    /// repeated saves overwrite the previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str =
            serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO ballot_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT value FROM ballot_state WHERE key = ?1")
            .context("failed to prepare load_state query")?;

        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .context("failed to query ballot state")?;

        match rows.next() {
            Some(row_result) => {
                let json_str = row_result.context("failed to read state row")?;
                let value = serde_json::from_str(&json_str)
                    .context("failed to deserialize state value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Delete every journal entry, event, and state key. Uses a transaction
    /// with automatic rollback on error.
    pub fn clear_ballot(&self) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute("DELETE FROM commands", [])
            .context("failed to delete command journal")?;
        tx.execute("DELETE FROM events", [])
            .context("failed to delete events")?;
        tx.execute("DELETE FROM ballot_state", [])
            .context("failed to delete ballot state")?;
        tx.commit().context("failed to commit clear_ballot")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ballot ID management
    // ------------------------------------------------------------------

    const BALLOT_ID_KEY: &'static str = "current_ballot_id";
    const AUTHORITY_KEY: &'static str = "authority";

    /// Retrieve the stored ballot ID. `None` if no ballot has been started.
    pub fn get_ballot_id(&self) -> Result<Option<String>> {
        let value = self.load_state(Self::BALLOT_ID_KEY)?;
        Ok(value.and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    pub fn set_ballot_id(&self, ballot_id: &str) -> Result<()> {
        self.save_state(
            Self::BALLOT_ID_KEY,
            &serde_json::Value::String(ballot_id.to_string()),
        )
    }

    /// The authority the stored ballot was created with.
    pub fn get_authority(&self) -> Result<Option<ParticipantId>> {
        let value = self.load_state(Self::AUTHORITY_KEY)?;
        Ok(value.and_then(|v| v.as_str().map(ParticipantId::from)))
    }

    pub fn set_authority(&self, authority: &ParticipantId) -> Result<()> {
        self.save_state(
            Self::AUTHORITY_KEY,
            &serde_json::Value::String(authority.to_string()),
        )
    }

    /// Generate a new ballot ID from the current UTC time.
    ///
    /// Format: `ballot_YYYYMMDD_HHMMSS_SSS` (e.g. `ballot_20260228_143022_123`).
    pub fn generate_ballot_id() -> String {
        let now = chrono::Utc::now();
        now.format("ballot_%Y%m%d_%H%M%S_%3f").to_string()
    }
}

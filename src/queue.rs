//! Durable store-and-forward queue.
//!
//! A single SQLite table acts as an ordered mailbox between the telemetry
//! producers (power machine, GPS producer) and the publisher:
//!
//! ```text
//!  producers ──append──▶ ┌───────────────────────────────┐
//!                        │ telemetry_queue               │
//!                        │ id │ topic │ msg │ created_at │ ──oldest/remove──▶ publisher
//!                        └───────────────────────────────┘
//! ```
//!
//! `id` is `AUTOINCREMENT`, so ids are never reused and ordering by id is
//! insertion order.  Each operation runs under the connection lock and is
//! atomic on its own; fetch-then-remove is deliberately two operations.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::app::ports::TelemetrySink;
use crate::error::Result;
use crate::telemetry::{Record, Topic};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS telemetry_queue (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        topic       TEXT    NOT NULL,
        msg         TEXT    NOT NULL,
        created_at  TEXT    NOT NULL
    );
";

/// Cloneable handle to the queue; clones share one connection.
#[derive(Clone)]
pub struct TelemetryQueue {
    connection: Arc<Mutex<Connection>>,
}

impl TelemetryQueue {
    /// Open (creating if needed) the queue database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.pragma_update(None, "synchronous", "FULL")?;
        Self::with_connection(connection)
    }

    /// A queue that lives only as long as the handle; for tests.
    pub fn volatile() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Insert a record, returning its id.
    pub fn push(&self, topic: Topic, payload: &str) -> Result<i64> {
        let connection = self.connection.lock();
        connection.execute(
            "INSERT INTO telemetry_queue (topic, msg, created_at) VALUES (?1, ?2, ?3)",
            params![topic.as_str(), payload, Utc::now().to_rfc3339()],
        )?;
        let id = connection.last_insert_rowid();
        debug!(target: "queue", "appended #{id} ({topic})");
        Ok(id)
    }

    /// The oldest record still queued, if any.
    ///
    /// Rows whose topic or timestamp cannot be decoded are dropped with a
    /// warning so a single bad row cannot wedge the drain.
    pub fn oldest(&self) -> Result<Option<Record>> {
        let connection = self.connection.lock();
        loop {
            let row = connection
                .query_row(
                    "SELECT id, topic, msg, created_at FROM telemetry_queue ORDER BY id ASC LIMIT 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, topic, payload, created_at)) = row else {
                return Ok(None);
            };

            let decoded = topic.parse::<Topic>().and_then(|topic| {
                DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| (topic, t.with_timezone(&Utc)))
                    .map_err(|e| e.to_string())
            });
            match decoded {
                Ok((topic, created_at)) => {
                    return Ok(Some(Record {
                        id,
                        topic,
                        payload,
                        created_at,
                    }));
                }
                Err(e) => {
                    warn!(target: "queue", "dropping undecodable record #{id}: {e}");
                    connection.execute("DELETE FROM telemetry_queue WHERE id = ?1", [id])?;
                }
            }
        }
    }

    /// Delete record `id`.  Returns `false` if it was already gone.
    pub fn remove(&self, id: i64) -> Result<bool> {
        let connection = self.connection.lock();
        let n = connection.execute("DELETE FROM telemetry_queue WHERE id = ?1", [id])?;
        Ok(n == 1)
    }

    /// Number of queued records.
    pub fn len(&self) -> Result<u64> {
        let connection = self.connection.lock();
        let n: i64 = connection.query_row("SELECT COUNT(*) FROM telemetry_queue", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Log the backlog left over from a previous run.
    pub fn report_backlog(&self) -> Result<()> {
        let n = self.len()?;
        if n > 0 {
            info!(target: "queue", "{n} record(s) pending from a previous run");
        }
        Ok(())
    }
}

impl TelemetrySink for TelemetryQueue {
    fn append(&self, topic: Topic, payload: &str) -> Result<i64> {
        self.push(topic, payload)
    }
}

//! Idempotent, resumable projection of the event log into SQLite.
//!
//! Two feeding modes that may run concurrently:
//! - **push** — [`Indexer::index_event`] right after a log append;
//! - **pull** — [`Indexer::catch_up`] replaying the log from a persisted
//!   byte-offset bookmark.
//!
//! Both funnel through the same per-event path: `INSERT OR IGNORE` the raw
//! row keyed by event id, and only on an actual insert run the kind's
//! projection handler. A duplicate id is therefore a complete no-op, which
//! is what makes push + pull safe together and makes any catch-up batch
//! safely retryable.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use metrics::counter;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument, warn};

use flightrec_core::TelemetryEvent;

use crate::errors::{Result, StoreError};
use crate::projections;
use crate::sqlite::{run_migrations, ConnectionPool};

/// Bookmark key in `indexer_state`: byte offset into the log file up to
/// which events have been indexed, stored as a decimal string.
pub const BOOKMARK_KEY: &str = "jsonl_last_offset";

/// Counter: events projected into the index.
pub const METRIC_EVENTS_INDEXED: &str = "flightrec_indexer_events_indexed_total";
/// Counter: events skipped (duplicate id or unparseable line).
pub const METRIC_EVENTS_SKIPPED: &str = "flightrec_indexer_events_skipped_total";

/// Outcome of one [`Indexer::catch_up`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Events newly projected this pass.
    pub indexed: u64,
    /// Lines skipped: already-indexed ids plus unparseable lines.
    pub skipped: u64,
    /// Byte offset the bookmark now points at.
    pub offset: u64,
}

/// SQLite projection engine over the event log.
#[derive(Clone)]
pub struct Indexer {
    pool: ConnectionPool,
}

impl Indexer {
    /// Build an indexer over `pool`, running schema migrations.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let _ = run_migrations(&conn)?;
        Ok(Self { pool })
    }

    /// Clone of the underlying pool, for handing to the query API.
    pub fn pool(&self) -> ConnectionPool {
        self.pool.clone()
    }

    /// Index a single event (push mode).
    ///
    /// Returns `Ok(true)` if the event was newly projected, `Ok(false)` if
    /// its id was already present (nothing else happens in that case).
    #[instrument(skip_all, fields(event_id = %event.id, kind = %event.kind))]
    pub fn index_event(&self, event: &TelemetryEvent) -> Result<bool> {
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        let inserted = index_one(&tx, event)?;
        tx.commit()?;

        if inserted {
            counter!(METRIC_EVENTS_INDEXED).increment(1);
        } else {
            counter!(METRIC_EVENTS_SKIPPED).increment(1);
            debug!("duplicate event id, skipped");
        }
        Ok(inserted)
    }

    /// Replay the log from the persisted bookmark (pull mode).
    ///
    /// Reads `bookmark..EOF`, excluding a trailing unterminated line (those
    /// bytes stay unconsumed for the next pass). The whole batch and the
    /// bookmark advance commit in one transaction; a failure before commit
    /// leaves the old bookmark, so a retry re-reads the same bytes and the
    /// per-id no-op absorbs the overlap.
    #[instrument(skip_all, fields(log = %log_path.display()))]
    pub fn catch_up(&self, log_path: &Path) -> Result<CatchUpReport> {
        let conn = self.pool.get()?;
        let bookmark = read_bookmark(&conn)?;

        let mut file = match std::fs::File::open(log_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("log file absent, nothing to catch up");
                return Ok(CatchUpReport {
                    offset: bookmark,
                    ..CatchUpReport::default()
                });
            }
            Err(e) => return Err(e.into()),
        };

        let _ = file.seek(SeekFrom::Start(bookmark))?;
        let mut buf = Vec::new();
        let _ = file.read_to_end(&mut buf)?;

        // Only complete lines are consumed; a partially-written tail keeps
        // its bytes for the next pass.
        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(CatchUpReport {
                offset: bookmark,
                ..CatchUpReport::default()
            });
        };
        let consumed = &buf[..=last_newline];
        let new_offset = bookmark + consumed.len() as u64;

        let mut indexed = 0u64;
        let mut skipped = 0u64;

        let tx = conn.unchecked_transaction()?;
        for line in consumed.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<TelemetryEvent>(line) {
                Ok(event) => {
                    if index_one(&tx, &event)? {
                        indexed += 1;
                    } else {
                        skipped += 1;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "skipping unparseable log line");
                    skipped += 1;
                }
            }
        }
        write_bookmark(&tx, new_offset)?;
        tx.commit()?;

        counter!(METRIC_EVENTS_INDEXED).increment(indexed);
        counter!(METRIC_EVENTS_SKIPPED).increment(skipped);
        debug!(indexed, skipped, offset = new_offset, "catch-up complete");

        Ok(CatchUpReport {
            indexed,
            skipped,
            offset: new_offset,
        })
    }
}

/// Raw insert plus projection dispatch. The raw `INSERT OR IGNORE` is the
/// idempotency gate: projections run only when the raw row is new.
fn index_one(conn: &Connection, event: &TelemetryEvent) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO events
           (id, kind, ts, seq, agent_id, session_key, session_id, run_id,
            source, data, error, blob_refs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            event.id,
            event.kind,
            event.ts,
            event.seq,
            event.agent_id,
            event.session_key,
            event.session_id,
            event.run_id,
            serde_json::to_value(event.source)?
                .as_str()
                .ok_or_else(|| StoreError::Internal("source tag is not a string".into()))?,
            serde_json::to_string(&event.data)?,
            event
                .error
                .as_ref()
                .map(|e| serde_json::to_string(e))
                .transpose()?,
            event
                .blob_refs
                .as_ref()
                .map(|refs| serde_json::to_string(refs))
                .transpose()?,
        ],
    )? == 1;

    if inserted {
        projections::dispatch(conn, event)?;
    }
    Ok(inserted)
}

fn read_bookmark(conn: &Connection) -> Result<u64> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM indexer_state WHERE key = ?1",
            params![BOOKMARK_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(0),
        Some(s) => match s.parse::<u64>() {
            Ok(offset) => Ok(offset),
            Err(_) => {
                warn!(value = %s, "invalid bookmark value, replaying from start");
                Ok(0)
            }
        },
    }
}

fn write_bookmark(conn: &Connection, offset: u64) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO indexer_state (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![BOOKMARK_KEY, offset.to_string()],
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

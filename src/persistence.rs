//! # SQLite Session Store
//!
//! Durable fallback store for run sessions that could not be finalized on the
//! backend. Aggregates live in columns so sessions can be listed cheaply; the
//! track itself is a MessagePack blob loaded with the row.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, TrackingError};
use crate::store::LocalSessionStore;
use crate::{RunSession, TrackPoint};

/// SQLite-backed [`LocalSessionStore`].
pub struct SqliteSessionStore {
    db: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) a store at the given database path.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[SqliteSessionStore] Opened {}", db_path);
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Sessions persisted through the degraded path
            CREATE TABLE IF NOT EXISTS run_sessions (
                id TEXT PRIMARY KEY,
                route_id TEXT,
                is_public INTEGER NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                moving_time_s INTEGER NOT NULL,
                total_distance_m REAL NOT NULL,
                elevation_gain_m REAL,
                avg_pace_sec_per_km REAL,
                point_count INTEGER NOT NULL,
                points BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_run_sessions_started ON run_sessions(started_at);
        "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| TrackingError::persistence("database lock poisoned"))
    }

    /// Load one session by id.
    pub fn get(&self, id: &str) -> Result<Option<RunSession>> {
        let db = self.lock()?;
        let row = db
            .query_row(
                "SELECT id, route_id, is_public, started_at, ended_at, moving_time_s,
                        total_distance_m, elevation_gain_m, avg_pace_sec_per_km, points, created_at
                 FROM run_sessions WHERE id = ?",
                params![id],
                read_row,
            )
            .optional()?;
        row.map(into_session).transpose()
    }

    /// All stored sessions, newest first.
    pub fn list(&self) -> Result<Vec<RunSession>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT id, route_id, is_public, started_at, ended_at, moving_time_s,
                    total_distance_m, elevation_gain_m, avg_pace_sec_per_km, points, created_at
             FROM run_sessions ORDER BY started_at DESC",
        )?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_session).collect()
    }

    /// Remove a session, e.g. once it has been synced elsewhere.
    /// Returns whether a row was deleted.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let db = self.lock()?;
        let deleted = db.execute("DELETE FROM run_sessions WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }

    pub fn count(&self) -> Result<u32> {
        let db = self.lock()?;
        let count: u32 = db.query_row("SELECT COUNT(*) FROM run_sessions", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl LocalSessionStore for SqliteSessionStore {
    fn save(&self, session: &RunSession) -> Result<()> {
        let points = rmp_serde::to_vec(&session.points)?;
        let db = self.lock()?;
        db.execute(
            "INSERT OR REPLACE INTO run_sessions
                (id, route_id, is_public, started_at, ended_at, moving_time_s,
                 total_distance_m, elevation_gain_m, avg_pace_sec_per_km,
                 point_count, points, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                session.id,
                session.route_id,
                session.is_public,
                session.started_at.timestamp_millis(),
                session.ended_at.map(|t| t.timestamp_millis()),
                session.moving_time_s as i64,
                session.total_distance_m,
                session.elevation_gain_m,
                session.avg_pace_sec_per_km,
                session.points.len() as i64,
                points,
                session.created_at.timestamp_millis(),
            ],
        )?;
        debug!(
            "[SqliteSessionStore] Saved session {} ({} points)",
            session.id,
            session.points.len()
        );
        Ok(())
    }
}

/// Raw column values for one session row.
struct SessionRow {
    id: String,
    route_id: Option<String>,
    is_public: bool,
    started_at: i64,
    ended_at: Option<i64>,
    moving_time_s: i64,
    total_distance_m: f64,
    elevation_gain_m: Option<f64>,
    avg_pace_sec_per_km: Option<f64>,
    points: Vec<u8>,
    created_at: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        route_id: row.get(1)?,
        is_public: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        moving_time_s: row.get(5)?,
        total_distance_m: row.get(6)?,
        elevation_gain_m: row.get(7)?,
        avg_pace_sec_per_km: row.get(8)?,
        points: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| TrackingError::persistence(format!("invalid timestamp {}", millis)))
}

fn into_session(row: SessionRow) -> Result<RunSession> {
    let points: Vec<TrackPoint> = rmp_serde::from_slice(&row.points)?;
    Ok(RunSession {
        id: row.id,
        route_id: row.route_id,
        is_public: row.is_public,
        started_at: timestamp(row.started_at)?,
        ended_at: row.ended_at.map(timestamp).transpose()?,
        moving_time_s: row.moving_time_s.max(0) as u64,
        total_distance_m: row.total_distance_m,
        elevation_gain_m: row.elevation_gain_m,
        avg_pace_sec_per_km: row.avg_pace_sec_per_km,
        points,
        created_at: timestamp(row.created_at)?,
    })
}

//! Persistance SQLite des stations, programmes, diffusions, sons et logs.
//!
//! Une seule base pour toutes les stations. Les dates sont stockées en
//! texte RFC 3339 UTC (à la milliseconde) : l'ordre lexicographique est
//! l'ordre chronologique, les comparaisons se font donc directement en SQL.

mod diffusions;
mod logs;
mod programs;
mod sounds;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    slug TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS programs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    station_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    path TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    FOREIGN KEY (station_id) REFERENCES stations(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS streams (
    program_id INTEGER PRIMARY KEY,
    begin_time TEXT,
    end_time TEXT,
    delay INTEGER,
    FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    program_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    duration_secs INTEGER NOT NULL,
    timezone TEXT NOT NULL,
    frequency INTEGER NOT NULL,
    initial_id INTEGER,
    FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE,
    FOREIGN KEY (initial_id) REFERENCES schedules(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS diffusions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    program_id INTEGER NOT NULL,
    start_at TEXT NOT NULL,
    end_at TEXT NOT NULL,
    type INTEGER NOT NULL,
    initial_id INTEGER,
    FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE,
    FOREIGN KEY (initial_id) REFERENCES diffusions(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_diffusions_start ON diffusions(start_at);
CREATE INDEX IF NOT EXISTS idx_diffusions_program ON diffusions(program_id, start_at);

CREATE TABLE IF NOT EXISTS sounds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    program_id INTEGER NOT NULL,
    diffusion_id INTEGER,
    path TEXT NOT NULL UNIQUE,
    type INTEGER NOT NULL,
    FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE,
    FOREIGN KEY (diffusion_id) REFERENCES diffusions(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sound_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    timestamp INTEGER,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    FOREIGN KEY (sound_id) REFERENCES sounds(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    station_id INTEGER NOT NULL,
    source TEXT NOT NULL,
    type INTEGER NOT NULL,
    date TEXT NOT NULL,
    comment TEXT,
    sound_id INTEGER,
    track_id INTEGER,
    diffusion_id INTEGER,
    FOREIGN KEY (station_id) REFERENCES stations(id) ON DELETE CASCADE,
    FOREIGN KEY (sound_id) REFERENCES sounds(id) ON DELETE SET NULL,
    FOREIGN KEY (track_id) REFERENCES tracks(id) ON DELETE SET NULL,
    FOREIGN KEY (diffusion_id) REFERENCES diffusions(id) ON DELETE SET NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_station ON logs(station_id, type, date);
CREATE INDEX IF NOT EXISTS idx_logs_diffusion ON logs(diffusion_id);
";

/// Accès à la base. Toutes les méthodes sont bloquantes.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Ouvre (ou crée) la base `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!(path = %path.display(), "Opening store");
        Self::init(Connection::open(path)?)
    }

    /// Base temporaire en mémoire
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // une requête qui a paniqué ne laisse pas la connexion incohérente
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn datetime_to_sql(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn date_to_sql(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn time_to_sql(time: &NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn get_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveTime> {
    let text: String = row.get(idx)?;
    NaiveTime::parse_from_str(&text, "%H:%M:%S").map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveTime>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| NaiveTime::parse_from_str(&t, "%H:%M:%S").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Convertit une erreur du modèle levée dans un `query_map`.
pub(crate) fn model_error(idx: usize, err: crate::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_datetime_text_is_sortable() {
        let a = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1500);
        assert_eq!(datetime_to_sql(&a), "2024-06-03T09:00:00.000Z");
        assert!(datetime_to_sql(&a) < datetime_to_sql(&b));
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("airstation.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        let count: i64 = store
            .conn()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'logs'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}

//! Journal des événements (append-only).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use super::{datetime_to_sql, get_datetime, model_error, Store};
use crate::diffusion::DiffusionId;
use crate::log::{Log, LogId, LogType, NewLog};
use crate::sound::TrackId;
use crate::station::{path_string, StationId};
use crate::Result;

const LOG_COLUMNS: &str =
    "l.id, l.station_id, l.source, l.type, l.date, l.comment, l.sound_id, l.track_id, l.diffusion_id";

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<Log> {
    let kind: i64 = row.get(3)?;
    Ok(Log {
        id: row.get(0)?,
        station_id: row.get(1)?,
        source: row.get(2)?,
        kind: LogType::from_i64(kind).map_err(|e| model_error(3, e))?,
        date: get_datetime(row, 4)?,
        comment: row.get(5)?,
        sound_id: row.get(6)?,
        track_id: row.get(7)?,
        diffusion_id: row.get(8)?,
    })
}

impl Store {
    /// Ajoute une entrée au journal, et la trace.
    pub fn append_log(&self, log: &NewLog) -> Result<Log> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO logs
                (station_id, source, type, date, comment, sound_id, track_id, diffusion_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                log.station_id,
                log.source,
                log.kind.as_i64(),
                datetime_to_sql(&log.date),
                log.comment,
                log.sound_id,
                log.track_id,
                log.diffusion_id,
            ],
        )?;
        let saved = Log {
            id: conn.last_insert_rowid(),
            station_id: log.station_id,
            source: log.source.clone(),
            kind: log.kind,
            date: log.date,
            comment: log.comment.clone(),
            sound_id: log.sound_id,
            track_id: log.track_id,
            diffusion_id: log.diffusion_id,
        };
        info!(station = saved.station_id, "{}", saved);
        Ok(saved)
    }

    /// Journal complet d'une station, par ordre d'insertion.
    pub fn logs_of_station(&self, station: StationId) -> Result<Vec<Log>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM logs l WHERE l.station_id = ?1 ORDER BY l.id"
        ))?;
        let logs = stmt
            .query_map(params![station], log_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    /// Dernier log `on_air` de la source pour ce son (par son chemin ou,
    /// pour un fichier inconnu, par le commentaire) daté entre `from` et
    /// `to`.
    pub fn find_on_air_log(
        &self,
        station: StationId,
        source: &str,
        path: &Path,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<Log>> {
        let conn = self.conn();
        let log = conn
            .query_row(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM logs l
                     LEFT JOIN sounds s ON s.id = l.sound_id
                     WHERE l.station_id = ?1 AND l.source = ?2 AND l.type = ?3
                       AND l.track_id IS NULL
                       AND (s.path = ?4 OR (l.sound_id IS NULL AND l.comment = ?4))
                       AND l.date >= ?5 AND l.date <= ?6
                     ORDER BY l.id DESC LIMIT 1"
                ),
                params![
                    station,
                    source,
                    LogType::OnAir.as_i64(),
                    path_string(path),
                    datetime_to_sql(&from),
                    datetime_to_sql(&to),
                ],
                log_from_row,
            )
            .optional()?;
        Ok(log)
    }

    /// Log de démarrage d'une diffusion, s'il existe.
    pub fn start_log_of(
        &self,
        station: StationId,
        diffusion: DiffusionId,
    ) -> Result<Option<Log>> {
        self.first_log_of(station, diffusion, LogType::Start)
    }

    pub fn cancel_log_of(
        &self,
        station: StationId,
        diffusion: DiffusionId,
    ) -> Result<Option<Log>> {
        self.first_log_of(station, diffusion, LogType::Cancel)
    }

    fn first_log_of(
        &self,
        station: StationId,
        diffusion: DiffusionId,
        kind: LogType,
    ) -> Result<Option<Log>> {
        let conn = self.conn();
        let log = conn
            .query_row(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM logs l
                     WHERE l.station_id = ?1 AND l.diffusion_id = ?2 AND l.type = ?3
                     ORDER BY l.id LIMIT 1"
                ),
                params![station, diffusion, kind.as_i64()],
                log_from_row,
            )
            .optional()?;
        Ok(log)
    }

    /// Pistes déjà journalisées sur la station après le log `after`.
    pub fn logged_track_ids_after(
        &self,
        station: StationId,
        after: LogId,
    ) -> Result<HashSet<TrackId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT track_id FROM logs
             WHERE station_id = ?1 AND id > ?2 AND track_id IS NOT NULL",
        )?;
        let ids = stmt
            .query_map(params![station, after], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    /// Chemins des sons passés à l'antenne sur `source` après le log
    /// `after`, dans l'ordre.
    pub fn on_air_paths_after(
        &self,
        station: StationId,
        source: &str,
        after: LogId,
    ) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.path FROM logs l JOIN sounds s ON s.id = l.sound_id
             WHERE l.station_id = ?1 AND l.source = ?2 AND l.type = ?3
               AND l.id > ?4 AND l.track_id IS NULL
             ORDER BY l.id",
        )?;
        let paths = stmt
            .query_map(
                params![station, source, LogType::OnAir.as_i64(), after],
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }
}

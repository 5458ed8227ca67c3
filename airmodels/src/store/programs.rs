//! Stations, programmes, streams et grilles.

use chrono::Duration;
use chrono_tz::Tz;
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use super::{
    date_to_sql, get_date, get_opt_time, get_time, model_error, time_to_sql, Store,
};
use crate::schedule::{Frequency, NewSchedule, Schedule, ScheduleId};
use crate::station::{path_string, slugify, Program, ProgramId, Station, StationId, Stream};
use crate::{Error, Result};

const STATION_COLUMNS: &str = "id, name, slug, path";
const PROGRAM_COLUMNS: &str = "id, station_id, title, slug, path, active";
const SCHEDULE_COLUMNS: &str =
    "id, program_id, date, time, duration_secs, timezone, frequency, initial_id";

fn station_from_row(row: &Row<'_>) -> rusqlite::Result<Station> {
    Ok(Station {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        path: PathBuf::from(row.get::<_, String>(3)?),
    })
}

fn program_from_row(row: &Row<'_>) -> rusqlite::Result<Program> {
    Ok(Program {
        id: row.get(0)?,
        station_id: row.get(1)?,
        title: row.get(2)?,
        slug: row.get(3)?,
        path: PathBuf::from(row.get::<_, String>(4)?),
        active: row.get(5)?,
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let timezone: String = row.get(5)?;
    let timezone: Tz = timezone
        .parse()
        .map_err(|_| model_error(5, Error::invalid(format!("timezone {timezone}"))))?;
    let frequency: u8 = row.get(6)?;
    Ok(Schedule {
        id: row.get(0)?,
        program_id: row.get(1)?,
        date: get_date(row, 2)?,
        time: get_time(row, 3)?,
        duration: Duration::seconds(row.get(4)?),
        timezone,
        frequency: Frequency::from_bits(frequency),
        initial_id: row.get(7)?,
    })
}

impl Store {
    // ---- stations ----

    /// Crée une station ; le slug est dérivé du nom.
    pub fn insert_station(&self, name: &str, path: &Path) -> Result<Station> {
        let slug = slugify(name);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO stations (name, slug, path) VALUES (?1, ?2, ?3)",
            params![name, slug, path_string(path)],
        )?;
        Ok(Station {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            slug,
            path: path.to_path_buf(),
        })
    }

    pub fn stations(&self) -> Result<Vec<Station>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {STATION_COLUMNS} FROM stations ORDER BY name"
        ))?;
        let stations = stmt
            .query_map([], station_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stations)
    }

    /// Recherche une station par nom ou par slug.
    pub fn station_by_name(&self, name: &str) -> Result<Option<Station>> {
        let conn = self.conn();
        let station = conn
            .query_row(
                &format!("SELECT {STATION_COLUMNS} FROM stations WHERE name = ?1 OR slug = ?1"),
                params![name],
                station_from_row,
            )
            .optional()?;
        Ok(station)
    }

    // ---- programmes ----

    pub fn insert_program(
        &self,
        station: StationId,
        title: &str,
        path: &Path,
        active: bool,
    ) -> Result<Program> {
        let slug = slugify(title);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO programs (station_id, title, slug, path, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![station, title, slug, path_string(path), active],
        )?;
        Ok(Program {
            id: conn.last_insert_rowid(),
            station_id: station,
            title: title.to_string(),
            slug,
            path: path.to_path_buf(),
            active,
        })
    }

    pub fn program(&self, id: ProgramId) -> Result<Program> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROGRAM_COLUMNS} FROM programs WHERE id = ?1"),
            params![id],
            program_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(format!("program #{id}")))
    }

    pub fn programs_of_station(&self, station: StationId) -> Result<Vec<Program>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROGRAM_COLUMNS} FROM programs WHERE station_id = ?1 ORDER BY title"
        ))?;
        let programs = stmt
            .query_map(params![station], program_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(programs)
    }

    pub fn set_program_active(&self, id: ProgramId, active: bool) -> Result<()> {
        self.conn().execute(
            "UPDATE programs SET active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(())
    }

    // ---- streams ----

    /// Déclare (ou remplace) le stream d'un programme.
    pub fn set_stream(&self, stream: &Stream) -> Result<()> {
        if stream.begin.is_some() != stream.end.is_some() {
            return Err(Error::invalid("stream needs both begin and end, or none"));
        }
        self.conn().execute(
            "INSERT OR REPLACE INTO streams (program_id, begin_time, end_time, delay)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                stream.program_id,
                stream.begin.as_ref().map(time_to_sql),
                stream.end.as_ref().map(time_to_sql),
                stream.delay,
            ],
        )?;
        Ok(())
    }

    /// Programmes actifs de la station diffusés en continu, avec leur stream.
    pub fn streamed_programs(&self, station: StationId) -> Result<Vec<(Program, Stream)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.station_id, p.title, p.slug, p.path, p.active,
                    s.begin_time, s.end_time, s.delay
             FROM programs p JOIN streams s ON s.program_id = p.id
             WHERE p.station_id = ?1 AND p.active = 1
             ORDER BY s.delay IS NULL, s.begin_time IS NULL, p.title",
        )?;
        let rows = stmt
            .query_map(params![station], |row| {
                let program = program_from_row(row)?;
                let stream = Stream {
                    program_id: program.id,
                    begin: get_opt_time(row, 6)?,
                    end: get_opt_time(row, 7)?,
                    delay: row.get(8)?,
                };
                Ok((program, stream))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---- grilles ----

    /// Enregistre une grille.
    ///
    /// Une rediffusion reprend programme, durée et fréquence de sa grille
    /// initiale, et pointe toujours vers la grille initiale de plus haut
    /// niveau.
    pub fn insert_schedule(&self, schedule: &NewSchedule) -> Result<Schedule> {
        let mut schedule = schedule.clone();
        if let Some(initial_id) = schedule.initial_id {
            let initial = self.schedule(initial_id)?;
            let initial = match initial.initial_id {
                Some(top) => self.schedule(top)?,
                None => initial,
            };
            schedule.initial_id = Some(initial.id);
            schedule.program_id = initial.program_id;
            schedule.duration = initial.duration;
            schedule.frequency = initial.frequency;
        }

        let conn = self.conn();
        conn.execute(
            "INSERT INTO schedules
                (program_id, date, time, duration_secs, timezone, frequency, initial_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                schedule.program_id,
                date_to_sql(&schedule.date),
                time_to_sql(&schedule.time),
                schedule.duration.num_seconds(),
                schedule.timezone.name(),
                schedule.frequency.bits(),
                schedule.initial_id,
            ],
        )?;
        Ok(Schedule {
            id: conn.last_insert_rowid(),
            program_id: schedule.program_id,
            date: schedule.date,
            time: schedule.time,
            duration: schedule.duration,
            timezone: schedule.timezone,
            frequency: schedule.frequency,
            initial_id: schedule.initial_id,
        })
    }

    pub fn schedule(&self, id: ScheduleId) -> Result<Schedule> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
            params![id],
            schedule_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(format!("schedule #{id}")))
    }

    pub fn schedules_of_program(&self, program: ProgramId) -> Result<Vec<Schedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE program_id = ?1 ORDER BY id"
        ))?;
        let schedules = stmt
            .query_map(params![program], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }

    /// Grilles des programmes actifs, grilles initiales d'abord : les
    /// rediffusions d'un mois se rattachent aux diffusions initiales
    /// générées juste avant.
    pub fn schedules_for_update(&self) -> Result<Vec<Schedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.program_id, s.date, s.time, s.duration_secs, s.timezone,
                    s.frequency, s.initial_id
             FROM schedules s JOIN programs p ON p.id = s.program_id
             WHERE p.active = 1
             ORDER BY s.initial_id IS NOT NULL, s.id",
        )?;
        let schedules = stmt
            .query_map([], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }
}

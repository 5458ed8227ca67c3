//! Diffusions : insertion (avec aplatissement des rediffusions), requêtes
//! par fenêtre de temps, changements d'état.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{datetime_to_sql, get_datetime, model_error, Store};
use crate::diffusion::{Diffusion, DiffusionId, DiffusionType, NewDiffusion};
use crate::sound::Sound;
use crate::station::{ProgramId, StationId};
use crate::{Error, Result};

const DIFFUSION_COLUMNS: &str = "d.id, d.program_id, d.start_at, d.end_at, d.type, d.initial_id";

fn diffusion_from_row(row: &Row<'_>) -> rusqlite::Result<Diffusion> {
    let kind: i64 = row.get(4)?;
    Ok(Diffusion {
        id: row.get(0)?,
        program_id: row.get(1)?,
        start: get_datetime(row, 2)?,
        end: get_datetime(row, 3)?,
        kind: DiffusionType::from_i64(kind).map_err(|e| model_error(4, e))?,
        initial_id: row.get(5)?,
    })
}

fn find_diffusion(conn: &Connection, id: DiffusionId) -> Result<Option<Diffusion>> {
    Ok(conn
        .query_row(
            &format!("SELECT {DIFFUSION_COLUMNS} FROM diffusions d WHERE d.id = ?1"),
            params![id],
            diffusion_from_row,
        )
        .optional()?)
}

/// Insère une diffusion en rattachant une rediffusion à la diffusion
/// initiale de plus haut niveau. Un rattachement à soi-même ou à une
/// diffusion disparue est ignoré.
fn insert_in(conn: &Connection, diffusion: &NewDiffusion) -> Result<Diffusion> {
    let mut diffusion = diffusion.clone();
    if let Some(initial_id) = diffusion.initial_id {
        match find_diffusion(conn, initial_id)? {
            Some(initial) => {
                let top = match initial.initial_id {
                    Some(top) => find_diffusion(conn, top)?.unwrap_or(initial),
                    None => initial,
                };
                diffusion.initial_id = Some(top.id);
                diffusion.program_id = top.program_id;
            }
            None => diffusion.initial_id = None,
        }
    }

    conn.execute(
        "INSERT INTO diffusions (program_id, start_at, end_at, type, initial_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            diffusion.program_id,
            datetime_to_sql(&diffusion.start),
            datetime_to_sql(&diffusion.end),
            diffusion.kind.as_i64(),
            diffusion.initial_id,
        ],
    )?;
    Ok(Diffusion {
        id: conn.last_insert_rowid(),
        program_id: diffusion.program_id,
        start: diffusion.start,
        end: diffusion.end,
        kind: diffusion.kind,
        initial_id: diffusion.initial_id,
    })
}

impl Store {
    pub fn insert_diffusion(&self, diffusion: &NewDiffusion) -> Result<Diffusion> {
        insert_in(&self.conn(), diffusion)
    }

    /// Insère un lot de diffusions dans une seule transaction.
    pub fn insert_diffusions(&self, diffusions: &[NewDiffusion]) -> Result<Vec<Diffusion>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let saved = diffusions
            .iter()
            .map(|d| insert_in(&tx, d))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(saved)
    }

    pub fn diffusion(&self, id: DiffusionId) -> Result<Diffusion> {
        find_diffusion(&self.conn(), id)?.ok_or_else(|| Error::not_found(format!("diffusion #{id}")))
    }

    pub fn set_diffusion_type(&self, id: DiffusionId, kind: DiffusionType) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE diffusions SET type = ?2 WHERE id = ?1",
            params![id, kind.as_i64()],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("diffusion #{id}")));
        }
        Ok(())
    }

    pub fn delete_diffusion(&self, id: DiffusionId) -> Result<()> {
        self.conn()
            .execute("DELETE FROM diffusions WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Diffusions du programme commençant entre `from` (inclus) et `to`
    /// (exclu), par date de début.
    pub fn diffusions_of_program(
        &self,
        program: ProgramId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Diffusion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DIFFUSION_COLUMNS} FROM diffusions d
             WHERE d.program_id = ?1 AND d.start_at >= ?2 AND d.start_at < ?3
             ORDER BY d.start_at"
        ))?;
        let diffusions = stmt
            .query_map(
                params![program, datetime_to_sql(&from), datetime_to_sql(&to)],
                diffusion_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(diffusions)
    }

    /// Diffusions des programmes de la station qui chevauchent
    /// `[from, to)`, filtrées par type, par date de début.
    pub fn diffusions_of_station(
        &self,
        station: StationId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        kinds: &[DiffusionType],
    ) -> Result<Vec<Diffusion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DIFFUSION_COLUMNS} FROM diffusions d
             JOIN programs p ON p.id = d.program_id
             WHERE p.station_id = ?1 AND d.end_at > ?2 AND d.start_at < ?3
             ORDER BY d.start_at, d.id"
        ))?;
        let diffusions = stmt
            .query_map(
                params![station, datetime_to_sql(&from), datetime_to_sql(&to)],
                diffusion_from_row,
            )?
            .filter(|row| row.as_ref().map_or(true, |d| kinds.contains(&d.kind)))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(diffusions)
    }

    /// Diffusions chevauchant `[start, end)`, au sens de
    /// [`crate::diffusion::overlaps`].
    pub fn conflicts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<DiffusionId>,
    ) -> Result<Vec<Diffusion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DIFFUSION_COLUMNS} FROM diffusions d
             WHERE ((d.start_at < ?1 AND d.end_at > ?1) OR (d.start_at > ?1 AND d.start_at < ?2))
               AND d.id IS NOT ?3
             ORDER BY d.start_at"
        ))?;
        let diffusions = stmt
            .query_map(
                params![datetime_to_sql(&start), datetime_to_sql(&end), exclude],
                diffusion_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(diffusions)
    }

    /// Supprime les diffusions non confirmées commençant avant `date`.
    pub fn delete_unconfirmed_before(&self, date: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn().execute(
            "DELETE FROM diffusions WHERE type = ?1 AND start_at < ?2",
            params![DiffusionType::Unconfirmed.as_i64(), datetime_to_sql(&date)],
        )?;
        Ok(deleted)
    }

    /// Diffusions non confirmées commençant après `date`.
    pub fn unconfirmed_after(&self, date: DateTime<Utc>) -> Result<Vec<Diffusion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DIFFUSION_COLUMNS} FROM diffusions d
             WHERE d.type = ?1 AND d.start_at > ?2
             ORDER BY d.start_at"
        ))?;
        let diffusions = stmt
            .query_map(
                params![DiffusionType::Unconfirmed.as_i64(), datetime_to_sql(&date)],
                diffusion_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(diffusions)
    }

    /// Diffusion normale à l'antenne à `at` à laquelle appartient le son,
    /// directement ou comme rediffusion.
    pub fn diffusion_of_sound_at(
        &self,
        sound: &Sound,
        at: DateTime<Utc>,
    ) -> Result<Option<Diffusion>> {
        let Some(owner) = sound.diffusion_id else {
            return Ok(None);
        };
        let at = datetime_to_sql(&at);
        let conn = self.conn();
        let diffusion = conn
            .query_row(
                &format!(
                    "SELECT {DIFFUSION_COLUMNS} FROM diffusions d
                     WHERE (d.id = ?1 OR d.initial_id = ?1) AND d.type = ?2
                       AND d.start_at <= ?3 AND d.end_at > ?3
                     ORDER BY d.start_at LIMIT 1"
                ),
                params![owner, DiffusionType::Normal.as_i64(), at],
                diffusion_from_row,
            )
            .optional()?;
        Ok(diffusion)
    }
}

//! Sons et pistes ; construction des playlists.

use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use super::{model_error, Store};
use crate::diffusion::Diffusion;
use crate::sound::{NewSound, NewTrack, Sound, SoundId, SoundType, Track};
use crate::station::{path_string, ProgramId};
use crate::Result;

const SOUND_COLUMNS: &str = "id, program_id, diffusion_id, path, type";

fn sound_from_row(row: &Row<'_>) -> rusqlite::Result<Sound> {
    let kind: i64 = row.get(4)?;
    Ok(Sound {
        id: row.get(0)?,
        program_id: row.get(1)?,
        diffusion_id: row.get(2)?,
        path: PathBuf::from(row.get::<_, String>(3)?),
        kind: SoundType::from_i64(kind).map_err(|e| model_error(4, e))?,
    })
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        sound_id: row.get(1)?,
        position: row.get(2)?,
        timestamp: row.get(3)?,
        title: row.get(4)?,
        artist: row.get(5)?,
    })
}

impl Store {
    pub fn insert_sound(&self, sound: &NewSound) -> Result<Sound> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sounds (program_id, diffusion_id, path, type) VALUES (?1, ?2, ?3, ?4)",
            params![
                sound.program_id,
                sound.diffusion_id,
                path_string(&sound.path),
                sound.kind.as_i64(),
            ],
        )?;
        Ok(Sound {
            id: conn.last_insert_rowid(),
            program_id: sound.program_id,
            diffusion_id: sound.diffusion_id,
            path: sound.path.clone(),
            kind: sound.kind,
        })
    }

    pub fn set_sound_type(&self, id: SoundId, kind: SoundType) -> Result<()> {
        self.conn().execute(
            "UPDATE sounds SET type = ?2 WHERE id = ?1",
            params![id, kind.as_i64()],
        )?;
        Ok(())
    }

    pub fn sound_by_path(&self, path: &Path) -> Result<Option<Sound>> {
        let conn = self.conn();
        let sound = conn
            .query_row(
                &format!("SELECT {SOUND_COLUMNS} FROM sounds WHERE path = ?1"),
                params![path_string(path)],
                sound_from_row,
            )
            .optional()?;
        Ok(sound)
    }

    /// Fichiers à jouer pour une diffusion : les archives de la diffusion
    /// initiale pour une rediffusion, triées par chemin.
    pub fn diffusion_playlist(&self, diffusion: &Diffusion) -> Result<Vec<PathBuf>> {
        self.archive_paths("diffusion_id = ?1", diffusion.sounds_owner())
    }

    /// Archives d'un programme, pour le stream continu.
    pub fn program_playlist(&self, program: ProgramId) -> Result<Vec<PathBuf>> {
        self.archive_paths("program_id = ?1", program)
    }

    fn archive_paths(&self, filter: &str, id: i64) -> Result<Vec<PathBuf>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT path FROM sounds WHERE {filter} AND type = ?2 AND path != '' ORDER BY path"
        ))?;
        let paths = stmt
            .query_map(params![id, SoundType::Archive.as_i64()], |row| {
                row.get::<_, String>(0).map(PathBuf::from)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    pub fn insert_track(&self, track: &NewTrack) -> Result<Track> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tracks (sound_id, position, timestamp, title, artist)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                track.sound_id,
                track.position,
                track.timestamp,
                track.title,
                track.artist,
            ],
        )?;
        Ok(Track {
            id: conn.last_insert_rowid(),
            sound_id: track.sound_id,
            position: track.position,
            timestamp: track.timestamp,
            title: track.title.clone(),
            artist: track.artist.clone(),
        })
    }

    /// Pistes horodatées d'un son, dans l'ordre de leur horodatage.
    pub fn timed_tracks(&self, sound: SoundId) -> Result<Vec<Track>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, sound_id, position, timestamp, title, artist FROM tracks
             WHERE sound_id = ?1 AND timestamp IS NOT NULL
             ORDER BY timestamp, position",
        )?;
        let tracks = stmt
            .query_map(params![sound], track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }
}

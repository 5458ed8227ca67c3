//! Stations and programs.

use chrono::NaiveTime;
use std::path::{Path, PathBuf};

pub type StationId = i64;
pub type ProgramId = i64;

/// A radio station: one engine configuration, one control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub slug: String,
    /// Working directory of the station (engine script, socket, playlists).
    pub path: PathBuf,
}

impl Station {
    /// Identifier usable inside the engine script (`-` is not allowed there).
    pub fn engine_id(&self) -> String {
        self.slug.replace('-', "_")
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join("station.liq")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.path.join("station.sock")
    }
}

/// A program of a station.
///
/// A program is either scheduled (it owns schedules and diffusions) or
/// streamed (it owns a [`Stream`] and its archives are played non-stop
/// when nothing is scheduled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub id: ProgramId,
    pub station_id: StationId,
    pub title: String,
    pub slug: String,
    /// Archive location on disk.
    pub path: PathBuf,
    pub active: bool,
}

impl Program {
    pub fn archives_path(&self) -> PathBuf {
        self.path.join("archives")
    }

    pub fn excerpts_path(&self) -> PathBuf {
        self.path.join("excerpts")
    }
}

/// Continuous diffusion settings of a streamed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub program_id: ProgramId,
    /// Time range in which the stream may play (both or none).
    pub begin: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    /// Minimal delay in seconds between two plays of the stream.
    pub delay: Option<u32>,
}

impl Stream {
    /// A stream without time range nor delay is always eligible and needs
    /// no dedicated switch in the engine script.
    pub fn is_constrained(&self) -> bool {
        self.begin.is_some() || self.delay.is_some()
    }
}

/// Builds a slug out of a display name: lowercase ASCII alphanumerics
/// separated by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

pub(crate) fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

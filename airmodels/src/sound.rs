//! Sounds and their tracks.

use std::fmt;
use std::path::PathBuf;

use crate::diffusion::DiffusionId;
use crate::station::ProgramId;
use crate::{Error, Result};

pub type SoundId = i64;
pub type TrackId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundType {
    Other = 0,
    /// Full recording of a diffusion, played on air.
    Archive = 1,
    Excerpt = 2,
    /// File gone from the disk.
    Removed = 3,
}

impl SoundType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Other),
            1 => Ok(Self::Archive),
            2 => Ok(Self::Excerpt),
            3 => Ok(Self::Removed),
            other => Err(Error::invalid(format!("sound type {other}"))),
        }
    }
}

/// An audio file of a program, optionally attached to one diffusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sound {
    pub id: SoundId,
    pub program_id: ProgramId,
    pub diffusion_id: Option<DiffusionId>,
    pub path: PathBuf,
    pub kind: SoundType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSound {
    pub program_id: ProgramId,
    pub diffusion_id: Option<DiffusionId>,
    pub path: PathBuf,
    pub kind: SoundType,
}

impl Sound {
    /// Only archives can be put in a playlist.
    pub fn is_playable(&self) -> bool {
        self.kind == SoundType::Archive && !self.path.as_os_str().is_empty()
    }
}

/// A track inside a sound. `timestamp` is the offset in seconds from the
/// beginning of the sound, when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: TrackId,
    pub sound_id: SoundId,
    pub position: u32,
    pub timestamp: Option<u32>,
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrack {
    pub sound_id: SoundId,
    pub position: u32,
    pub timestamp: Option<u32>,
    pub title: String,
    pub artist: String,
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -- {}", self.artist, self.title)
    }
}

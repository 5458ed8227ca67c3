//! Append-only event log of what happened on air.
//!
//! The monitor trusts nothing else across restarts: every decision it
//! takes is recomputed from these records.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::diffusion::DiffusionId;
use crate::sound::{SoundId, TrackId};
use crate::station::StationId;
use crate::{Error, Result};

pub type LogId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    /// Source stopped.
    Stop = 0,
    /// A diffusion was started on the dealer.
    Start = 1,
    /// A diffusion did not start in time.
    Cancel = 2,
    /// A sound or a track has been played.
    OnAir = 3,
    Other = 4,
    /// A playlist was pushed to a queue source.
    Load = 5,
}

impl LogType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Stop),
            1 => Ok(Self::Start),
            2 => Ok(Self::Cancel),
            3 => Ok(Self::OnAir),
            4 => Ok(Self::Other),
            5 => Ok(Self::Load),
            other => Err(Error::invalid(format!("log type {other}"))),
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::OnAir => "on_air",
            Self::Other => "other",
            Self::Load => "load",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub id: LogId,
    pub station_id: StationId,
    /// Id of the source in the engine.
    pub source: String,
    pub kind: LogType,
    pub date: DateTime<Utc>,
    pub comment: Option<String>,
    pub sound_id: Option<SoundId>,
    pub track_id: Option<TrackId>,
    pub diffusion_id: Option<DiffusionId>,
}

/// A log entry to append.
///
/// ```
/// use airmodels::{LogType, NewLog};
/// use chrono::Utc;
///
/// let log = NewLog::new(1, "dealer", LogType::Start, Utc::now())
///     .diffusion(12)
///     .comment("diffusion started");
/// assert_eq!(log.diffusion_id, Some(12));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLog {
    pub station_id: StationId,
    pub source: String,
    pub kind: LogType,
    pub date: DateTime<Utc>,
    pub comment: Option<String>,
    pub sound_id: Option<SoundId>,
    pub track_id: Option<TrackId>,
    pub diffusion_id: Option<DiffusionId>,
}

impl NewLog {
    pub fn new(
        station_id: StationId,
        source: impl Into<String>,
        kind: LogType,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            station_id,
            source: source.into(),
            kind,
            date,
            comment: None,
            sound_id: None,
            track_id: None,
            diffusion_id: None,
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn sound(mut self, sound: Option<SoundId>) -> Self {
        self.sound_id = sound;
        self
    }

    pub fn track(mut self, track: TrackId) -> Self {
        self.track_id = Some(track);
        self
    }

    pub fn diffusion(mut self, diffusion: DiffusionId) -> Self {
        self.diffusion_id = Some(diffusion);
        self
    }
}

impl fmt::Display for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.date.format("%Y/%m/%d %H:%M:%S"),
            self.source,
            self.kind
        )?;
        if let Some(diffusion) = self.diffusion_id {
            write!(f, " diffusion #{diffusion}")?;
        }
        if let Some(sound) = self.sound_id {
            write!(f, " sound #{sound}")?;
        }
        if let Some(track) = self.track_id {
            write!(f, " track #{track}")?;
        }
        if let Some(comment) = &self.comment {
            write!(f, ": {comment}")?;
        }
        Ok(())
    }
}

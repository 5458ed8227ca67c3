//! Typed view of the metadata returned by the engine for a request.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;

use crate::{Error, Result};

/// Date format of the `on_air` field, in the engine's local time.
pub const AIR_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Request id in the engine.
pub type Rid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        })
    }
}

/// Metadata of a request, as parsed from a `key="value"` response.
///
/// Only known keys are kept; a malformed known key makes the whole parse
/// fail.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    pub rid: Option<Rid>,
    pub uri: Option<String>,
    /// Raw engine status (`playing`, `ready`, `destroyed`...)
    pub status: Option<String>,
    pub air_time: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl Metadata {
    pub fn parse(data: &HashMap<String, String>) -> Result<Self> {
        let field = |key: &str| {
            data.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let rid = field("rid")
            .map(|rid| {
                rid.parse::<Rid>()
                    .map_err(|_| Error::parse(format!("invalid rid {rid:?}")))
            })
            .transpose()?;
        let air_time = field("on_air").map(|date| parse_air_time(&date)).transpose()?;

        Ok(Self {
            rid,
            uri: field("initial_uri").or_else(|| field("filename")),
            status: field("status"),
            air_time,
            source: field("source"),
            title: field("title"),
            artist: field("artist"),
        })
    }

    /// Status of a request once compared to the requests on air.
    pub fn status_among(&self, on_air: &[Rid]) -> Status {
        match (self.rid, self.status.as_deref()) {
            (Some(rid), _) if on_air.contains(&rid) => Status::Playing,
            (Some(_), Some("playing" | "ready")) => Status::Paused,
            _ => Status::Stopped,
        }
    }
}

/// Parses an engine date, in the local time of the host running the
/// engine.
pub fn parse_air_time(date: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(date.trim(), AIR_TIME_FORMAT)
        .map_err(|_| Error::parse(format!("invalid air time {date:?}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::parse(format!("air time {date:?} does not exist locally")))
}

/// Parses a space separated list of request ids, skipping anything else.
pub fn parse_rids(body: &str) -> Vec<Rid> {
    body.split_whitespace()
        .filter_map(|rid| rid.parse().ok())
        .collect()
}

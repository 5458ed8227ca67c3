//! Diffusions: concrete occurrences of a program on air.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::station::ProgramId;
use crate::{Error, Result};

pub type DiffusionId = i64;

/// Lifecycle state of a [`Diffusion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffusionType {
    /// Confirmed, will be played.
    Normal = 0,
    /// Generated by the planning, waiting for a confirmation.
    Unconfirmed = 1,
    /// Did not start in time (or was canceled by hand).
    Canceled = 2,
}

impl DiffusionType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Unconfirmed),
            2 => Ok(Self::Canceled),
            other => Err(Error::invalid(format!("diffusion type {other}"))),
        }
    }
}

impl fmt::Display for DiffusionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Unconfirmed => "unconfirmed",
            Self::Canceled => "canceled",
        })
    }
}

/// A persisted diffusion.
///
/// `initial_id` is the top-level original of a rerun: the store never
/// lets it point to another rerun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diffusion {
    pub id: DiffusionId,
    pub program_id: ProgramId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kind: DiffusionType,
    pub initial_id: Option<DiffusionId>,
}

/// A diffusion not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDiffusion {
    pub program_id: ProgramId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kind: DiffusionType,
    pub initial_id: Option<DiffusionId>,
}

impl Diffusion {
    pub fn is_rerun(&self) -> bool {
        self.initial_id.is_some()
    }

    /// Id of the diffusion holding the sounds to play: the initial one for
    /// a rerun, itself otherwise.
    pub fn sounds_owner(&self) -> DiffusionId {
        self.initial_id.unwrap_or(self.id)
    }

    /// `start <= at < end`
    pub fn is_on_air_at(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn conflicts_with(&self, other: &Diffusion) -> bool {
        self.id != other.id && overlaps(self.start, self.end, other.start, other.end)
    }
}

impl fmt::Display for Diffusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} [{}] {} - {}",
            self.id,
            self.kind,
            self.start.format("%Y/%m/%d %H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// Overlap test between `[start, end)` and the `[other_start, other_end)`
/// interval of another diffusion.
///
/// Two diffusions starting at the same instant are not reported: the test
/// is symmetric and only looks at strictly earlier or later starts.
pub fn overlaps(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    other_start: DateTime<Utc>,
    other_end: DateTime<Utc>,
) -> bool {
    (other_start < start && other_end > start) || (other_start > start && other_start < end)
}

/// Diffusions of `candidates` overlapping `diffusion`, itself excluded.
///
/// Conflicts are advisory: nothing prevents two overlapping diffusions
/// from being saved.
pub fn get_conflicts<'a>(diffusion: &Diffusion, candidates: &'a [Diffusion]) -> Vec<&'a Diffusion> {
    candidates
        .iter()
        .filter(|other| diffusion.conflicts_with(other))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn diffusion(id: DiffusionId, start_min: i64, len_min: i64) -> Diffusion {
        let origin = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let start = origin + Duration::minutes(start_min);
        Diffusion {
            id,
            program_id: 1,
            start,
            end: start + Duration::minutes(len_min),
            kind: DiffusionType::Normal,
            initial_id: None,
        }
    }

    #[test]
    fn test_conflicts_exclude_self() {
        let all = vec![diffusion(1, 0, 60), diffusion(2, 30, 60), diffusion(3, 60, 30)];
        let conflicts = get_conflicts(&all[0], &all);
        let ids: Vec<_> = conflicts.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_conflicts_are_symmetric() {
        let all = vec![
            diffusion(1, 0, 60),
            diffusion(2, 30, 60),
            diffusion(3, 60, 30),
            diffusion(4, 0, 10),
            diffusion(5, -30, 240),
            diffusion(6, 200, 5),
        ];
        for a in &all {
            for b in get_conflicts(a, &all) {
                assert_ne!(a.id, b.id);
                assert!(
                    get_conflicts(b, &all).iter().any(|c| c.id == a.id),
                    "{} conflicts with {} but not the reverse",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_adjacent_diffusions_do_not_conflict() {
        let a = diffusion(1, 0, 60);
        let b = diffusion(2, 60, 60);
        assert!(!a.conflicts_with(&b));
        assert!(!b.conflicts_with(&a));
    }

    #[test]
    fn test_on_air_range() {
        let d = diffusion(1, 0, 60);
        assert!(d.is_on_air_at(d.start));
        assert!(d.is_on_air_at(d.start + Duration::minutes(59)));
        assert!(!d.is_on_air_at(d.end));
    }

    #[test]
    fn test_type_codes() {
        for kind in [
            DiffusionType::Normal,
            DiffusionType::Unconfirmed,
            DiffusionType::Canceled,
        ] {
            assert_eq!(DiffusionType::from_i64(kind.as_i64()).unwrap(), kind);
        }
        assert!(DiffusionType::from_i64(7).is_err());
    }
}

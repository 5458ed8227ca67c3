//! Planning actions: generate the diffusions of a month from the schedules,
//! and clean up unconfirmed diffusions.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::diffusion::{Diffusion, DiffusionType};
use crate::schedule::{Rerun, Schedule};
use crate::{Error, Result, Store};

/// How generated diffusions are typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanningMode {
    /// Everything is left unconfirmed.
    #[default]
    Manual,
    /// Diffusions without conflict are confirmed right away.
    Auto,
}

impl FromStr for PlanningMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            other => Err(Error::invalid(format!("planning mode {other:?}"))),
        }
    }
}

impl fmt::Display for PlanningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        })
    }
}

/// Generates and saves the diffusions of the month of `month` for every
/// schedule of an active program. Returns the number of diffusions saved.
///
/// Initial schedules are handled before reruns so that reruns can be
/// linked to the diffusions generated in the same pass.
pub fn update(store: &Store, month: NaiveDate, mode: PlanningMode) -> Result<usize> {
    let mut total = 0;
    for schedule in store.schedules_for_update()? {
        let mut diffusions = diffusions_of_schedule(store, &schedule, month)?;
        if diffusions.is_empty() {
            continue;
        }

        if mode == PlanningMode::Auto {
            for diffusion in diffusions.iter_mut() {
                if store.conflicts(diffusion.start, diffusion.end, None)?.is_empty() {
                    diffusion.kind = DiffusionType::Normal;
                }
            }
        }

        let saved = store.insert_diffusions(&diffusions)?;
        info!(
            schedule = %schedule,
            count = saved.len(),
            "Diffusions generated for {}",
            month.format("%Y/%m")
        );
        total += saved.len();
    }
    Ok(total)
}

fn diffusions_of_schedule(
    store: &Store,
    schedule: &Schedule,
    month: NaiveDate,
) -> Result<Vec<crate::NewDiffusion>> {
    let dates = schedule.dates_of_month(month);
    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
        return Ok(Vec::new());
    };
    let existing: Vec<DateTime<Utc>> = store
        .diffusions_of_program(schedule.program_id, *first, *last + Duration::seconds(1))?
        .into_iter()
        .map(|d| d.start)
        .collect();

    let Some(initial_id) = schedule.initial_id else {
        return Ok(schedule.diffusions_of_month(month, &existing, None));
    };

    let initial = store.schedule(initial_id)?;
    let initial_diffusions = initial_diffusions(store, schedule, &initial, &dates)?;
    Ok(schedule.diffusions_of_month(
        month,
        &existing,
        Some(Rerun {
            initial: &initial,
            diffusions: &initial_diffusions,
        }),
    ))
}

/// Persisted diffusions of the initial program around the dates a rerun
/// refers to.
fn initial_diffusions(
    store: &Store,
    schedule: &Schedule,
    initial: &Schedule,
    dates: &[DateTime<Utc>],
) -> Result<Vec<Diffusion>> {
    let offset = schedule.date - initial.date;
    let margin = Duration::days(1);
    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
        return Ok(Vec::new());
    };
    store.diffusions_of_program(
        initial.program_id,
        *first - offset - margin,
        *last - offset + margin,
    )
}

/// Deletes unconfirmed diffusions starting before `date`.
pub fn clean(store: &Store, date: DateTime<Utc>) -> Result<usize> {
    let deleted = store.delete_unconfirmed_before(date)?;
    info!(deleted, "Unconfirmed diffusions before {} cleaned", date);
    Ok(deleted)
}

/// Deletes unconfirmed diffusions starting after `date` that no schedule of
/// their program produces any more.
pub fn check(store: &Store, date: DateTime<Utc>) -> Result<usize> {
    let mut deleted = 0;
    for diffusion in store.unconfirmed_after(date)? {
        let schedules = store.schedules_of_program(diffusion.program_id)?;
        if schedules.iter().any(|s| s.matches(diffusion.start)) {
            continue;
        }
        debug!(diffusion = %diffusion, "No schedule matches any more");
        store.delete_diffusion(diffusion.id)?;
        deleted += 1;
    }
    info!(deleted, "Unconfirmed diffusions after {} checked", date);
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("manual".parse::<PlanningMode>().unwrap(), PlanningMode::Manual);
        assert_eq!("AUTO".parse::<PlanningMode>().unwrap(), PlanningMode::Auto);
        assert!("sometimes".parse::<PlanningMode>().is_err());
        assert_eq!(PlanningMode::default().to_string(), "manual");
    }
}

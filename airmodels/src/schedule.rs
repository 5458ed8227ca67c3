//! Recurrence rules of programs.
//!
//! A [`Schedule`] is anchored on a date (which gives the weekday and the
//! first occurrence) and repeats according to its [`Frequency`]:
//!
//! - bits 0 to 4: the weekday occurs in week N of the month (bit 4 is the
//!   fifth occurrence, when the month has one)
//! - [`Frequency::LAST`] alone: last occurrence of the weekday in the month
//! - [`Frequency::ONE_ON_TWO`]: every two weeks from the anchor date,
//!   regardless of month boundaries
//! - [`Frequency::PONCTUAL`]: no recurrence at all
//!
//! Occurrences are computed on local dates in the schedule's timezone and
//! only converted to UTC by [`Schedule::normalize`].

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;

use crate::diffusion::{Diffusion, DiffusionId, DiffusionType, NewDiffusion};
use crate::station::ProgramId;

pub type ScheduleId = i64;

/// Bitmask of weeks of the month, plus the two special values
/// [`Frequency::PONCTUAL`] and [`Frequency::ONE_ON_TWO`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Frequency(u8);

impl Frequency {
    pub const PONCTUAL: Self = Self(0b000000);
    pub const FIRST: Self = Self(0b000001);
    pub const SECOND: Self = Self(0b000010);
    pub const THIRD: Self = Self(0b000100);
    pub const FOURTH: Self = Self(0b001000);
    pub const LAST: Self = Self(0b010000);
    pub const FIRST_AND_THIRD: Self = Self(0b000101);
    pub const SECOND_AND_FOURTH: Self = Self(0b001010);
    pub const EVERY: Self = Self(0b011111);
    pub const ONE_ON_TWO: Self = Self(0b100000);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111111)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// `week` is 0-based (0 = first occurrence of the weekday).
    pub fn has_week(self, week: u8) -> bool {
        week < 5 && self.0 & (1 << week) != 0
    }

    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::PONCTUAL => "ponctual",
            Self::FIRST => "first",
            Self::SECOND => "second",
            Self::THIRD => "third",
            Self::FOURTH => "fourth",
            Self::LAST => "last",
            Self::FIRST_AND_THIRD => "first_and_third",
            Self::SECOND_AND_FOURTH => "second_and_fourth",
            Self::EVERY => "every",
            Self::ONE_ON_TWO => "one_on_two",
            _ => return None,
        })
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{:#08b}", self.0),
        }
    }
}

/// A persisted schedule.
///
/// For a rerun (`initial_id` set), `program_id`, `duration` and `frequency`
/// are copies of the initial schedule's values made by the store at
/// insertion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub id: ScheduleId,
    pub program_id: ProgramId,
    /// Anchor date: weekday and first occurrence.
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration: Duration,
    pub timezone: Tz,
    pub frequency: Frequency,
    pub initial_id: Option<ScheduleId>,
}

/// A schedule not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchedule {
    pub program_id: ProgramId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration: Duration,
    pub timezone: Tz,
    pub frequency: Frequency,
    pub initial_id: Option<ScheduleId>,
}

/// The initial side of a rerun schedule, used to link generated reruns to
/// their original diffusion.
#[derive(Debug, Clone, Copy)]
pub struct Rerun<'a> {
    pub initial: &'a Schedule,
    /// Already persisted diffusions of the initial schedule's program.
    pub diffusions: &'a [Diffusion],
}

impl Schedule {
    pub fn is_rerun(&self) -> bool {
        self.initial_id.is_some()
    }

    /// Combines `date` with the schedule's time in its timezone.
    ///
    /// An ambiguous local time (end of daylight saving time) resolves to its
    /// earliest instant; a local time falling in the spring gap is moved one
    /// hour later.
    pub fn normalize(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(self.time);
        self.timezone
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.timezone
                    .from_local_datetime(&(naive + Duration::hours(1)))
                    .earliest()
            })
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    }

    /// Whether the week of `date` is one where the schedule occurs.
    ///
    /// `date` is first moved to the schedule's weekday inside the same
    /// (Monday-based) week; the week of the month is then the index of that
    /// day among the same weekdays of its month.
    pub fn match_week(&self, date: NaiveDate) -> bool {
        let date = self.same_weekday(date);
        match self.frequency {
            Frequency::PONCTUAL => false,
            // différence de dates, jamais le numéro de semaine ISO
            Frequency::ONE_ON_TWO => (date - self.date).num_days().rem_euclid(14) == 0,
            Frequency::LAST => (date + Duration::days(7)).month() != date.month(),
            frequency => frequency.has_week(((date.day() - 1) / 7) as u8),
        }
    }

    /// Whether `at` is exactly an occurrence of this schedule.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let date = at.with_timezone(&self.timezone).date_naive();
        date.weekday() == self.date.weekday() && self.match_week(date) && self.normalize(date) == at
    }

    /// Local dates of the occurrences in the month of `month`.
    pub fn local_dates_of_month(&self, month: NaiveDate) -> Vec<NaiveDate> {
        if self.frequency == Frequency::PONCTUAL {
            return Vec::new();
        }

        let first = first_of_month(month);
        let last = last_of_month(month);
        let weekday = weekday_index(self.date);

        if self.frequency == Frequency::LAST {
            let back = (weekday_index(last) - weekday).rem_euclid(7);
            return vec![last - Duration::days(back)];
        }

        let mut date = first + Duration::days((weekday - weekday_index(first)).rem_euclid(7));
        let mut dates = Vec::new();

        if self.frequency == Frequency::ONE_ON_TWO {
            if (date - self.date).num_days().rem_euclid(14) != 0 {
                date += Duration::days(7);
            }
            while date <= last {
                dates.push(date);
                date += Duration::days(14);
            }
            return dates;
        }

        for week in 0..5u8 {
            if !self.frequency.has_week(week) {
                continue;
            }
            let candidate = date + Duration::days(7 * i64::from(week));
            // une 5e occurrence peut déborder sur le mois suivant
            if candidate <= last {
                dates.push(candidate);
            }
        }
        dates
    }

    /// Occurrences in the month of `month`, normalized to UTC.
    pub fn dates_of_month(&self, month: NaiveDate) -> Vec<DateTime<Utc>> {
        self.local_dates_of_month(month)
            .into_iter()
            .map(|date| self.normalize(date))
            .collect()
    }

    /// Unconfirmed diffusions for the month of `month` that are not yet in
    /// `existing` (starts of the program's persisted diffusions).
    ///
    /// For a rerun, each diffusion is linked to the initial diffusion found
    /// at the same offset as between both anchor dates, flattened to the
    /// top-level initial. A missing initial diffusion leaves the rerun
    /// unlinked.
    pub fn diffusions_of_month(
        &self,
        month: NaiveDate,
        existing: &[DateTime<Utc>],
        rerun: Option<Rerun<'_>>,
    ) -> Vec<NewDiffusion> {
        self.local_dates_of_month(month)
            .into_iter()
            .filter_map(|date| {
                let start = self.normalize(date);
                if existing.contains(&start) {
                    return None;
                }
                let initial_id = rerun.and_then(|rerun| self.initial_diffusion(rerun, date));
                Some(NewDiffusion {
                    program_id: self.program_id,
                    start,
                    end: start + self.duration,
                    kind: DiffusionType::Unconfirmed,
                    initial_id,
                })
            })
            .collect()
    }

    fn initial_diffusion(&self, rerun: Rerun<'_>, date: NaiveDate) -> Option<DiffusionId> {
        let offset = self.date - rerun.initial.date;
        let at = rerun.initial.normalize(date - offset);
        rerun
            .diffusions
            .iter()
            .find(|diffusion| diffusion.start == at)
            .map(Diffusion::sounds_owner)
    }

    fn same_weekday(&self, date: NaiveDate) -> NaiveDate {
        date + Duration::days(weekday_index(self.date) - weekday_index(date))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} {} ({})",
            self.id,
            self.frequency,
            self.date.weekday(),
            self.time.format("%H:%M"),
            self.timezone
        )
    }
}

fn weekday_index(date: NaiveDate) -> i64 {
    i64::from(date.weekday().num_days_from_monday())
}

pub(crate) fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

pub(crate) fn last_of_month(date: NaiveDate) -> NaiveDate {
    let first = first_of_month(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn schedule(anchor: NaiveDate, frequency: Frequency) -> Schedule {
        Schedule {
            id: 1,
            program_id: 10,
            date: anchor,
            time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            duration: Duration::hours(1),
            timezone: chrono_tz::Europe::Brussels,
            frequency,
            initial_id: None,
        }
    }

    fn months() -> Vec<NaiveDate> {
        (2020..=2026)
            .flat_map(|y| (1..=12).map(move |m| day(y, m, 1)))
            .collect()
    }

    fn days_of_month(month: NaiveDate) -> Vec<NaiveDate> {
        month
            .iter_days()
            .take_while(|d| d.month() == month.month())
            .collect()
    }

    #[test]
    fn test_every_returns_each_matching_weekday() {
        for anchor in [day(2024, 6, 3), day(2024, 6, 9), day(2023, 2, 28)] {
            let sched = schedule(anchor, Frequency::EVERY);
            for month in months() {
                let expected: Vec<_> = days_of_month(month)
                    .into_iter()
                    .filter(|d| d.weekday() == anchor.weekday())
                    .collect();
                assert_eq!(sched.local_dates_of_month(month), expected, "{}", month);

                for dt in sched.dates_of_month(month) {
                    let local = dt.with_timezone(&sched.timezone);
                    assert_eq!(local.time(), sched.time);
                    assert_eq!(local.weekday(), anchor.weekday());
                }
            }
        }
    }

    #[test]
    fn test_last_is_in_final_week() {
        let sched = schedule(day(2024, 5, 31), Frequency::LAST);
        for month in months() {
            let dates = sched.local_dates_of_month(month);
            assert_eq!(dates.len(), 1);
            let date = dates[0];
            let last = last_of_month(month);
            assert_eq!(date.weekday(), Weekday::Fri);
            assert_eq!(date.month(), month.month());
            assert!(last - date < Duration::days(7), "{} / {}", date, last);
        }
    }

    #[test]
    fn test_one_on_two_keeps_fourteen_days_across_years() {
        let anchor = day(2020, 12, 21);
        let sched = schedule(anchor, Frequency::ONE_ON_TWO);
        let all: Vec<_> = months()
            .into_iter()
            .flat_map(|m| sched.local_dates_of_month(m))
            .collect();

        assert!(all.len() > 100);
        for date in &all {
            assert_eq!((*date - anchor).num_days().rem_euclid(14), 0, "{}", date);
        }
        for pair in all.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::days(14));
        }
    }

    #[test]
    fn test_fifth_week_only_when_present() {
        let sched = schedule(day(2024, 5, 3), Frequency::from_bits(0b10000 | 0b00001));
        // mai 2024 : cinq vendredis
        assert_eq!(
            sched.local_dates_of_month(day(2024, 5, 1)),
            vec![day(2024, 5, 3), day(2024, 5, 31)]
        );
        // juin 2024 : quatre vendredis
        assert_eq!(sched.local_dates_of_month(day(2024, 6, 1)), vec![day(2024, 6, 7)]);
    }

    #[test]
    fn test_ponctual_has_no_dates() {
        let sched = schedule(day(2024, 5, 3), Frequency::PONCTUAL);
        assert!(sched.dates_of_month(day(2024, 5, 1)).is_empty());
        assert!(!sched.match_week(day(2024, 5, 3)));
    }

    #[test]
    fn test_match_week() {
        let sched = schedule(day(2024, 6, 3), Frequency::FIRST_AND_THIRD);
        assert!(sched.match_week(day(2024, 6, 3)));
        assert!(!sched.match_week(day(2024, 6, 10)));
        assert!(sched.match_week(day(2024, 6, 17)));
        // un autre jour de la même semaine
        assert!(sched.match_week(day(2024, 6, 20)));

        let last = schedule(day(2024, 5, 31), Frequency::LAST);
        assert!(last.match_week(day(2024, 5, 31)));
        assert!(!last.match_week(day(2024, 5, 24)));
    }

    #[test]
    fn test_match_week_one_on_two_at_year_boundary() {
        // 2020 a 53 semaines ISO : la parité du numéro de semaine casse ici
        let sched = schedule(day(2020, 12, 21), Frequency::ONE_ON_TWO);
        assert!(sched.match_week(day(2021, 1, 4)));
        assert!(!sched.match_week(day(2020, 12, 28)));
        assert!(!sched.match_week(day(2021, 1, 11)));
    }

    #[test]
    fn test_match_week_agrees_with_dates_of_month() {
        for frequency in [
            Frequency::FIRST,
            Frequency::SECOND_AND_FOURTH,
            Frequency::LAST,
            Frequency::EVERY,
            Frequency::ONE_ON_TWO,
        ] {
            let sched = schedule(day(2024, 1, 10), frequency);
            for month in months() {
                let dates = sched.local_dates_of_month(month);
                for d in days_of_month(month) {
                    if d.weekday() == Weekday::Wed {
                        assert_eq!(sched.match_week(d), dates.contains(&d), "{} {}", frequency, d);
                    }
                }
            }
        }
    }

    #[test]
    fn test_matches() {
        let sched = schedule(day(2024, 6, 3), Frequency::EVERY);
        let at = sched.normalize(day(2024, 6, 10));
        assert!(sched.matches(at));
        assert!(!sched.matches(at + Duration::minutes(1)));
        assert!(!sched.matches(sched.normalize(day(2024, 6, 11))));
    }

    #[test]
    fn test_normalize_daylight_saving() {
        let mut sched = schedule(day(2024, 3, 31), Frequency::EVERY);
        assert_eq!(
            sched.normalize(day(2024, 1, 8)),
            Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()
        );
        assert_eq!(
            sched.normalize(day(2024, 7, 8)),
            Utc.with_ymd_and_hms(2024, 7, 8, 8, 0, 0).unwrap()
        );

        sched.time = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        // heure inexistante
        assert_eq!(
            sched.normalize(day(2024, 3, 31)),
            Utc.with_ymd_and_hms(2024, 3, 31, 1, 30, 0).unwrap()
        );
        // heure ambiguë
        assert_eq!(
            sched.normalize(day(2024, 10, 27)),
            Utc.with_ymd_and_hms(2024, 10, 27, 0, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_diffusions_of_month_is_idempotent() {
        let sched = schedule(day(2024, 6, 3), Frequency::EVERY);
        let month = day(2024, 6, 1);

        let first = sched.diffusions_of_month(month, &[], None);
        let second = sched.diffusions_of_month(month, &[], None);
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
        for d in &first {
            assert_eq!(d.kind, DiffusionType::Unconfirmed);
            assert_eq!(d.end - d.start, Duration::hours(1));
            assert_eq!(d.program_id, 10);
        }

        let saved: Vec<_> = first.iter().map(|d| d.start).collect();
        assert!(sched.diffusions_of_month(month, &saved, None).is_empty());

        let partial = &saved[..2];
        let rest = sched.diffusions_of_month(month, partial, None);
        assert_eq!(rest, first[2..].to_vec());
    }

    #[test]
    fn test_rerun_links_to_top_level_initial() {
        let initial = schedule(day(2024, 6, 3), Frequency::EVERY);
        let mut rerun = schedule(day(2024, 6, 5), Frequency::EVERY);
        rerun.id = 2;
        rerun.initial_id = Some(initial.id);
        rerun.time = NaiveTime::from_hms_opt(20, 0, 0).unwrap();

        let month = day(2024, 6, 1);
        let diffusions: Vec<Diffusion> = initial
            .diffusions_of_month(month, &[], None)
            .into_iter()
            .enumerate()
            .skip(1)
            .map(|(i, d)| Diffusion {
                id: 100 + i as i64,
                program_id: d.program_id,
                start: d.start,
                end: d.end,
                kind: DiffusionType::Normal,
                // la diffusion du 10 est elle-même une rediffusion
                initial_id: (i == 1).then_some(42),
            })
            .collect();

        let generated = rerun.diffusions_of_month(
            month,
            &[],
            Some(Rerun {
                initial: &initial,
                diffusions: &diffusions,
            }),
        );
        let links: Vec<_> = generated.iter().map(|d| d.initial_id).collect();
        // 5 juin -> 3 juin (absente), 12 -> 10, 19 -> 17, 26 -> 24
        assert_eq!(links, vec![None, Some(42), Some(102), Some(103)]);
        assert_ne!(links[1], Some(101));
    }

    #[test]
    fn test_frequency_names() {
        assert_eq!(Frequency::EVERY.to_string(), "every");
        assert_eq!(Frequency::from_bits(0b10001).name(), None);
        assert!(Frequency::EVERY.has_week(4));
        assert!(!Frequency::ONE_ON_TWO.has_week(5));
    }
}

//! # airmodels - Modèle de données d'une radio AirStation
//!
//! Cette crate regroupe :
//! - les entités persistées : [`Station`], [`Program`], [`Stream`],
//!   [`Schedule`], [`Diffusion`], [`Sound`], [`Track`], [`Log`]
//! - le moteur de récurrence des grilles ([`Schedule::dates_of_month`],
//!   [`Schedule::diffusions_of_month`])
//! - la détection de conflits entre diffusions ([`get_conflicts`])
//! - la persistance SQLite ([`Store`])
//! - les actions de planification ([`planning`])
//!
//! # Exemple
//!
//! ```no_run
//! use airmodels::{planning, PlanningMode, Store};
//! use chrono::NaiveDate;
//!
//! let store = Store::open(std::path::Path::new("airstation.db"))?;
//! let month = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//! let count = planning::update(&store, month, PlanningMode::Manual)?;
//! println!("{count} diffusions generated");
//! # Ok::<(), airmodels::Error>(())
//! ```

mod diffusion;
mod error;
mod log;
pub mod planning;
mod schedule;
mod sound;
mod station;
mod store;

#[cfg(feature = "airconfig")]
mod config_ext;

pub use diffusion::{get_conflicts, overlaps, Diffusion, DiffusionId, DiffusionType, NewDiffusion};
pub use error::{Error, Result};
pub use log::{Log, LogId, LogType, NewLog};
pub use planning::PlanningMode;
pub use schedule::{Frequency, NewSchedule, Rerun, Schedule, ScheduleId};
pub use sound::{NewSound, NewTrack, Sound, SoundId, SoundType, Track, TrackId};
pub use station::{slugify, Program, ProgramId, Station, StationId, Stream};
pub use store::Store;

#[cfg(feature = "airconfig")]
pub use config_ext::StoreConfigExt;

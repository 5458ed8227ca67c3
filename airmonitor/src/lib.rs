//! # airmonitor
//!
//! Boucle de réconciliation d'une station : à chaque passage, l'état du
//! moteur est comparé aux diffusions et aux logs enregistrés. Rien n'est
//! gardé en mémoire d'un passage à l'autre en dehors de la date de la
//! prochaine synchronisation des playlists : après un redémarrage, les logs
//! suffisent à reprendre là où la station en était.

mod error;
pub mod monitor;

#[cfg(feature = "airconfig")]
mod config_ext;

pub use error::{Error, Result};
pub use monitor::{Monitor, MonitorSettings};

#[cfg(feature = "airconfig")]
pub use config_ext::MonitorConfigExt;

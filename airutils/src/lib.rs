//! Utilitaires système pour AirStation.
//!
//! - [`find_processes_bound_to_socket`] : processus qui écoutent sur un
//!   socket Unix donné (détection des moteurs audio orphelins)
//! - [`kill_process`] : arrêt forcé d'un processus par pid
mod process;

pub use process::{ProcessInfo, find_processes_bound_to_socket, kill_process};

//! Extension de airconfig pour le moteur audio

use std::time::Duration;

use crate::connector::{DEFAULT_RETRIES, DEFAULT_TIMEOUT};
use crate::streamer::{StreamerSettings, DEFAULT_EXECUTABLE};

/// Trait d'extension pour airconfig::Config
pub trait StreamerConfigExt {
    /// Programme lancé pour chaque station (`streamer.executable`)
    fn streamer_executable(&self) -> String;

    /// Délai d'attente des échanges avec le moteur
    fn connector_timeout(&self) -> Duration;

    /// Nombre de nouvelles tentatives après un échec d'envoi
    fn connector_retries(&self) -> u32;

    fn streamer_settings(&self) -> StreamerSettings {
        StreamerSettings {
            executable: self.streamer_executable(),
            timeout: self.connector_timeout(),
            retries: self.connector_retries(),
        }
    }
}

impl StreamerConfigExt for airconfig::Config {
    fn streamer_executable(&self) -> String {
        self.get_string_or(&["streamer", "executable"], DEFAULT_EXECUTABLE)
    }

    fn connector_timeout(&self) -> Duration {
        let secs = self.get_u64_or(
            &["streamer", "connector", "timeout_secs"],
            DEFAULT_TIMEOUT.as_secs(),
        );
        Duration::from_secs(secs.max(1))
    }

    fn connector_retries(&self) -> u32 {
        let retries = self.get_u64_or(
            &["streamer", "connector", "retries"],
            u64::from(DEFAULT_RETRIES),
        );
        u32::try_from(retries).unwrap_or(DEFAULT_RETRIES)
    }
}

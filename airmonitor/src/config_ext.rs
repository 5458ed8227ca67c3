//! Extension de airconfig pour la boucle de surveillance

use std::time::Duration;
use tracing::warn;

use crate::monitor::{
    minutes, seconds, MonitorSettings, DEFAULT_CANCEL_TIMEOUT_MINS, DEFAULT_DELAY_MS,
    DEFAULT_SYNC_TIMEOUT_MINS, DEFAULT_TRACE_TOLERANCE_SECS,
};

/// Trait d'extension pour airconfig::Config
pub trait MonitorConfigExt {
    /// Attente entre deux passages de la boucle
    fn monitor_delay(&self) -> Duration;

    /// Retard au-delà duquel une diffusion non démarrée est annulée
    fn cancel_timeout(&self) -> chrono::Duration;

    /// Intervalle entre deux réécritures des playlists
    fn sync_timeout(&self) -> chrono::Duration;

    /// Écart toléré entre la date d'un log et celle rapportée par le moteur
    fn trace_tolerance(&self) -> chrono::Duration;

    fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            delay: self.monitor_delay(),
            cancel_timeout: self.cancel_timeout(),
            sync_timeout: self.sync_timeout(),
            trace_tolerance: self.trace_tolerance(),
        }
    }
}

impl MonitorConfigExt for airconfig::Config {
    fn monitor_delay(&self) -> Duration {
        Duration::from_millis(self.get_u64_or(&["monitor", "delay_ms"], DEFAULT_DELAY_MS))
    }

    fn cancel_timeout(&self) -> chrono::Duration {
        minutes_or(self, "cancel_timeout_mins", DEFAULT_CANCEL_TIMEOUT_MINS)
    }

    fn sync_timeout(&self) -> chrono::Duration {
        minutes_or(self, "sync_timeout_mins", DEFAULT_SYNC_TIMEOUT_MINS)
    }

    fn trace_tolerance(&self) -> chrono::Duration {
        let secs = self.get_u64_or(
            &["monitor", "trace_tolerance_secs"],
            DEFAULT_TRACE_TOLERANCE_SECS,
        );
        seconds(secs).unwrap_or_else(|| {
            warn!(secs, "monitor.trace_tolerance_secs out of range, using default");
            chrono::Duration::seconds(DEFAULT_TRACE_TOLERANCE_SECS as i64)
        })
    }
}

/// `monitor.<key>` en minutes ; la valeur par défaut remplace une durée
/// hors limites.
fn minutes_or(config: &airconfig::Config, key: &str, default: u64) -> chrono::Duration {
    let value = config.get_u64_or(&["monitor", key], default);
    minutes(value).unwrap_or_else(|| {
        warn!(value, "monitor.{} out of range, using default", key);
        chrono::Duration::minutes(default as i64)
    })
}

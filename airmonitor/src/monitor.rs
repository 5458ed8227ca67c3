//! Surveillance et pilotage d'une station.
//!
//! Un passage ([`Monitor::tick_at`]) enchaîne :
//!
//! 1. le traçage du son à l'antenne (log `on_air`),
//! 2. le rattrapage des pistes des programmes diffusés en continu,
//! 3. le chargement du dealer et le démarrage des diffusions prévues,
//! 4. l'annulation des diffusions qui n'ont pas pu démarrer,
//! 5. la réécriture périodique des playlists.
//!
//! Chaque décision est prise à partir des diffusions et des logs en base et
//! de l'état du moteur lu pendant le passage.

use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use airmodels::{Diffusion, DiffusionId, DiffusionType, Log, LogType, NewLog, StationId, Store};
use airstreamer::streamer::DEALER_ID;
use airstreamer::Streamer;

use crate::Result;

pub const DEFAULT_DELAY_MS: u64 = 1000;
pub const DEFAULT_CANCEL_TIMEOUT_MINS: u64 = 20;
pub const DEFAULT_SYNC_TIMEOUT_MINS: u64 = 5;
pub const DEFAULT_TRACE_TOLERANCE_SECS: u64 = 5;

/// Durée de `value` minutes, `None` si elle dépasse ce que chrono sait
/// représenter.
pub fn minutes(value: u64) -> Option<Duration> {
    i64::try_from(value).ok().and_then(Duration::try_minutes)
}

pub fn seconds(value: u64) -> Option<Duration> {
    i64::try_from(value).ok().and_then(Duration::try_seconds)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    /// Attente entre deux passages
    pub delay: std::time::Duration,
    pub cancel_timeout: Duration,
    pub sync_timeout: Duration,
    pub trace_tolerance: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            delay: std::time::Duration::from_millis(DEFAULT_DELAY_MS),
            cancel_timeout: Duration::minutes(DEFAULT_CANCEL_TIMEOUT_MINS as i64),
            sync_timeout: Duration::minutes(DEFAULT_SYNC_TIMEOUT_MINS as i64),
            trace_tolerance: Duration::seconds(DEFAULT_TRACE_TOLERANCE_SECS as i64),
        }
    }
}

pub struct Monitor {
    streamer: Streamer,
    store: Arc<Store>,
    settings: MonitorSettings,
    sync_next: Option<DateTime<Utc>>,
}

impl Monitor {
    pub fn new(streamer: Streamer, store: Arc<Store>, settings: MonitorSettings) -> Self {
        Self {
            streamer,
            store,
            settings,
            sync_next: None,
        }
    }

    pub fn streamer(&self) -> &Streamer {
        &self.streamer
    }

    pub fn streamer_mut(&mut self) -> &mut Streamer {
        &mut self.streamer
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    fn station_id(&self) -> StationId {
        self.streamer.station().id
    }

    /// Boucle jusqu'à ce que `shutdown` passe à vrai. Avec `watch_process`,
    /// la boucle s'arrête aussi quand le moteur lancé par le streamer se
    /// termine.
    pub fn run(&mut self, shutdown: &AtomicBool, watch_process: bool) {
        info!(station = %self.streamer.station().name, "Monitoring started");
        while !shutdown.load(Ordering::Relaxed) {
            if let Err(err) = self.tick() {
                warn!(station = %self.streamer.station().name, "Monitoring failed: {}", err);
            }
            if watch_process && !self.streamer.is_running() {
                warn!(station = %self.streamer.station().name, "Engine is not running anymore");
                break;
            }
            std::thread::sleep(self.settings.delay);
        }
        info!(station = %self.streamer.station().name, "Monitoring stopped");
    }

    pub fn tick(&mut self) -> Result<()> {
        self.tick_at(Utc::now())
    }

    /// Un passage de la boucle à la date `now`. Ne fait rien si le moteur
    /// ne répond pas.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.streamer.is_ready() {
            debug!(station = %self.streamer.station().name, "Engine not ready");
            return Ok(());
        }
        self.streamer.fetch()?;

        if let Some(log) = self.trace_sound()? {
            self.trace_tracks(&log, now)?;
        }
        self.handle_diffusions(now)?;
        self.cancel_stale(now)?;
        self.sync(now)
    }

    fn log(&self, log: &NewLog) -> Result<Log> {
        Ok(self.store.append_log(log)?)
    }

    /// Log `on_air` du son à l'antenne, créé s'il n'existe pas encore.
    fn trace_sound(&self) -> Result<Option<Log>> {
        let Some(source) = self.streamer.on_air() else {
            return Ok(None);
        };
        let state = source.state();
        let (Some(uri), Some(air_time)) = (state.uri.as_deref(), state.air_time) else {
            return Ok(None);
        };
        let path = Path::new(uri);
        let station = self.station_id();
        let tolerance = self.settings.trace_tolerance;

        if let Some(log) = self.store.find_on_air_log(
            station,
            source.id(),
            path,
            air_time - tolerance,
            air_time + tolerance,
        )? {
            return Ok(Some(log));
        }

        let sound = self.store.sound_by_path(path)?;
        let diffusion = match &sound {
            Some(sound) => self.store.diffusion_of_sound_at(sound, air_time)?,
            None => None,
        };
        let mut log = NewLog::new(station, source.id(), LogType::OnAir, air_time)
            .comment(uri)
            .sound(sound.map(|s| s.id));
        if let Some(diffusion) = diffusion {
            log = log.diffusion(diffusion.id);
        }
        self.log(&log).map(Some)
    }

    /// Logue les pistes minutées du son déjà passées, pour les programmes
    /// diffusés en continu uniquement.
    fn trace_tracks(&self, log: &Log, now: DateTime<Utc>) -> Result<()> {
        if log.diffusion_id.is_some() {
            return Ok(());
        }
        let Some(sound) = log.sound_id else {
            return Ok(());
        };
        let tracks = self.store.timed_tracks(sound)?;
        if tracks.is_empty() {
            return Ok(());
        }

        let logged = self.store.logged_track_ids_after(log.station_id, log.id)?;
        for track in tracks.iter().filter(|t| !logged.contains(&t.id)) {
            let Some(timestamp) = track.timestamp else {
                continue;
            };
            let date = log.date + Duration::seconds(i64::from(timestamp));
            if date > now {
                break;
            }
            self.log(
                &NewLog::new(log.station_id, &log.source, LogType::OnAir, date)
                    .comment(track.to_string())
                    .sound(Some(sound))
                    .track(track.id),
            )?;
        }
        Ok(())
    }

    /// Diffusion en cours : normale, démarrée (log `start`) et avec des
    /// sons à jouer.
    fn current_diffusion(&self, now: DateTime<Utc>) -> Result<Option<(Diffusion, Log)>> {
        let station = self.station_id();
        let diffusions = self.store.diffusions_of_station(
            station,
            now,
            now + Duration::seconds(1),
            &[DiffusionType::Normal],
        )?;
        for diffusion in diffusions.into_iter().filter(|d| d.is_on_air_at(now)) {
            if self.store.diffusion_playlist(&diffusion)?.is_empty() {
                continue;
            }
            if let Some(log) = self.store.start_log_of(station, diffusion.id)? {
                return Ok(Some((diffusion, log)));
            }
        }
        Ok(None)
    }

    /// Prochaine diffusion à lancer : normale, pas encore démarrée, pas
    /// trop en retard et avec des sons à jouer. Elle n'est retenue que si
    /// elle doit commencer maintenant ou s'enchaîner avec la diffusion en
    /// cours.
    fn next_diffusion(
        &self,
        now: DateTime<Utc>,
        current: Option<&Diffusion>,
    ) -> Result<Option<(Diffusion, Vec<PathBuf>)>> {
        let station = self.station_id();
        let horizon = current.map_or(now, |c| c.end.max(now));
        let diffusions = self.store.diffusions_of_station(
            station,
            now,
            horizon + Duration::seconds(1),
            &[DiffusionType::Normal],
        )?;
        let earliest = now - self.settings.cancel_timeout;
        for diffusion in diffusions {
            if diffusion.start < earliest || diffusion.start > horizon {
                continue;
            }
            if current.is_some_and(|c| diffusion.start <= c.start) {
                continue;
            }
            if self.store.start_log_of(station, diffusion.id)?.is_some() {
                continue;
            }
            let playlist = self.store.diffusion_playlist(&diffusion)?;
            if !playlist.is_empty() {
                return Ok(Some((diffusion, playlist)));
            }
        }
        Ok(None)
    }

    /// Sons de la diffusion en cours pas encore passés sur le dealer.
    fn remaining_sounds(&self, diffusion: &Diffusion, start: &Log) -> Result<Vec<PathBuf>> {
        let played = self
            .store
            .on_air_paths_after(start.station_id, DEALER_ID, start.id)?;
        Ok(self
            .store
            .diffusion_playlist(diffusion)?
            .into_iter()
            .filter(|p| !played.iter().any(|played| Path::new(played) == p))
            .collect())
    }

    fn handle_diffusions(&mut self, now: DateTime<Utc>) -> Result<()> {
        let current = self.current_diffusion(now)?;
        let next = self.next_diffusion(now, current.as_ref().map(|(d, _)| d))?;

        let mut playlist = match &current {
            Some((diffusion, start)) => self.remaining_sounds(diffusion, start)?,
            None => Vec::new(),
        };
        if let Some((_, sounds)) = &next {
            playlist.extend(sounds.iter().cloned());
        }

        let owner = next
            .as_ref()
            .map(|(d, _)| d.id)
            .or(current.as_ref().map(|(d, _)| d.id));
        self.load_dealer(&playlist, owner, now)?;

        match next {
            Some((diffusion, _)) if diffusion.start <= now => self.start_diffusion(&diffusion, now),
            // le son en cours n'est plus dans la file : on ne coupe le
            // dealer qu'en dehors de toute diffusion
            None if current.is_none() => self.stop_dealer(now),
            _ => Ok(()),
        }
    }

    /// Met la file du dealer en accord avec `playlist`. Si la file en est
    /// le début, seuls les sons manquants sont ajoutés ; sinon elle est
    /// vidée puis remplie.
    fn load_dealer(
        &mut self,
        playlist: &[PathBuf],
        diffusion: Option<DiffusionId>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let requests = self.streamer.dealer_requests();
        let queued: Vec<PathBuf> = requests
            .iter()
            .map(|r| PathBuf::from(r.uri.as_deref().unwrap_or_default()))
            .collect();
        if queued == playlist {
            return Ok(());
        }

        let missing = if playlist.starts_with(&queued) {
            &playlist[queued.len()..]
        } else {
            for request in &requests {
                self.streamer.remove_from_dealer(request.rid)?;
            }
            playlist
        };
        if missing.is_empty() {
            debug!(station = %self.streamer.station().name, "Dealer queue cleared");
            return Ok(());
        }
        self.streamer.push_to_dealer(missing)?;

        let mut log = NewLog::new(self.station_id(), DEALER_ID, LogType::Load, now)
            .comment(format!("{} sound(s) queued", missing.len()));
        if let Some(diffusion) = diffusion {
            log = log.diffusion(diffusion);
        }
        self.log(&log)?;
        Ok(())
    }

    fn start_diffusion(&mut self, diffusion: &Diffusion, now: DateTime<Utc>) -> Result<()> {
        self.streamer.set_dealer_active(true)?;
        self.streamer.skip_playing_except(DEALER_ID);
        self.log(
            &NewLog::new(self.station_id(), DEALER_ID, LogType::Start, now)
                .diffusion(diffusion.id)
                .comment(diffusion.to_string()),
        )?;
        Ok(())
    }

    /// Coupe le dealer s'il est encore actif alors qu'aucune diffusion
    /// n'est en cours.
    fn stop_dealer(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.streamer.dealer().active() {
            return Ok(());
        }
        self.streamer.set_dealer_active(false)?;
        self.log(
            &NewLog::new(self.station_id(), DEALER_ID, LogType::Stop, now)
                .comment("no diffusion on air"),
        )?;
        Ok(())
    }

    /// Annule les diffusions normales qui auraient dû démarrer depuis plus
    /// de `cancel_timeout` sans log de démarrage.
    fn cancel_stale(&self, now: DateTime<Utc>) -> Result<()> {
        let station = self.station_id();
        let cutoff = now - self.settings.cancel_timeout;
        let diffusions = self.store.diffusions_of_station(
            station,
            cutoff - Duration::days(1),
            cutoff,
            &[DiffusionType::Normal],
        )?;
        for diffusion in diffusions.into_iter().filter(|d| d.start < cutoff) {
            if self.store.start_log_of(station, diffusion.id)?.is_some()
                || self.store.diffusion_playlist(&diffusion)?.is_empty()
            {
                continue;
            }
            self.store
                .set_diffusion_type(diffusion.id, DiffusionType::Canceled)?;
            self.log(
                &NewLog::new(station, DEALER_ID, LogType::Cancel, now)
                    .diffusion(diffusion.id)
                    .comment(format!("{diffusion} not started in time")),
            )?;
        }
        Ok(())
    }

    /// Réécrit les playlists toutes les `sync_timeout`.
    fn sync(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.sync_next.is_some_and(|next| now < next) {
            return Ok(());
        }
        self.sync_next = Some(now + self.settings.sync_timeout);
        self.streamer.sync(&self.store)?;
        Ok(())
    }
}

//! Pilotage du moteur audio d'une station.

use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use airmodels::{Program, Station, Store, Stream};

use crate::connector::{Address, Connector, DEFAULT_RETRIES, DEFAULT_TIMEOUT};
use crate::metadata::Rid;
use crate::script::{self, ScriptSources};
use crate::source::{select_on_air, MasterSource, PlaylistSource, QueueSource, Request, Source};
use crate::{Error, Result};

pub const DEFAULT_EXECUTABLE: &str = "liquidsoap";
pub const MASTER_ID: &str = "master";
pub const DEALER_ID: &str = "dealer";

/// Réglages du moteur, communs à toutes les stations
#[derive(Debug, Clone, PartialEq)]
pub struct StreamerSettings {
    pub executable: String,
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for StreamerSettings {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }
}

/// Moteur audio d'une station : ses sources, son script et son processus.
pub struct Streamer {
    station: Station,
    executable: String,
    connector: Connector,
    master: MasterSource,
    dealer: QueueSource,
    playlists: Vec<PlaylistSource>,
    process: Option<Child>,
}

impl Streamer {
    /// `streams` donne les programmes diffusés en continu, dans l'ordre de
    /// déclaration dans le script.
    pub fn new(station: Station, streams: Vec<(Program, Stream)>, settings: StreamerSettings) -> Self {
        let connector = Connector::with_settings(
            Address::Unix(station.socket_path()),
            settings.timeout,
            settings.retries,
        );
        let playlists = streams
            .into_iter()
            .map(|(program, stream)| PlaylistSource::new(&station.path, program, stream))
            .collect();
        Self {
            station,
            executable: settings.executable,
            connector,
            master: MasterSource::new(MASTER_ID),
            dealer: QueueSource::new(DEALER_ID),
            playlists,
            process: None,
        }
    }

    pub fn from_store(store: &Store, station: Station, settings: StreamerSettings) -> Result<Self> {
        let streams = store.streamed_programs(station.id)?;
        Ok(Self::new(station, streams, settings))
    }

    pub fn station(&self) -> &Station {
        &self.station
    }

    pub fn connector_mut(&mut self) -> &mut Connector {
        &mut self.connector
    }

    pub fn master(&self) -> &MasterSource {
        &self.master
    }

    pub fn dealer(&self) -> &QueueSource {
        &self.dealer
    }

    pub fn playlists(&self) -> &[PlaylistSource] {
        &self.playlists
    }

    /// Sources pouvant être à l'antenne : le dealer puis les playlists.
    pub fn sources(&self) -> Vec<&dyn Source> {
        let mut sources: Vec<&dyn Source> = Vec::with_capacity(self.playlists.len() + 1);
        sources.push(&self.dealer);
        sources.extend(self.playlists.iter().map(|p| p as &dyn Source));
        sources
    }

    /// Source à l'antenne d'après le dernier [`Streamer::fetch`].
    pub fn on_air(&self) -> Option<&dyn Source> {
        select_on_air(&self.sources())
    }

    /// Le moteur répond-il sur son socket ?
    pub fn is_ready(&mut self) -> bool {
        self.connector
            .send("list")
            .map(|body| !body.trim().is_empty())
            .unwrap_or(false)
    }

    /// Rafraîchit l'état de toutes les sources.
    pub fn fetch(&mut self) -> Result<()> {
        let on_air = self.master.fetch_on_air(&mut self.connector)?.to_vec();
        self.master.fetch(&mut self.connector, &on_air);
        self.dealer.fetch(&mut self.connector, &on_air);
        for playlist in &mut self.playlists {
            playlist.fetch(&mut self.connector, &on_air);
        }
        Ok(())
    }

    pub fn dealer_requests(&mut self) -> Vec<Request> {
        self.dealer.requests(&mut self.connector)
    }

    pub fn push_to_dealer(&mut self, paths: &[std::path::PathBuf]) -> Result<()> {
        self.dealer.push(&mut self.connector, paths)
    }

    pub fn remove_from_dealer(&mut self, rid: Rid) -> Result<()> {
        self.dealer.remove(&mut self.connector, rid)
    }

    pub fn set_dealer_active(&mut self, active: bool) -> Result<()> {
        self.dealer.set_active(&mut self.connector, active)
    }

    /// Passe au son suivant sur toutes les sources en cours de lecture
    /// sauf `except`.
    pub fn skip_playing_except(&mut self, except: &str) {
        let ids: Vec<String> = self
            .sources()
            .into_iter()
            .filter(|s| s.id() != except && s.is_playing())
            .map(|s| s.id().to_string())
            .collect();
        for id in ids {
            if let Err(err) = self.connector.send(&format!("{id}.skip")) {
                warn!(station = %self.station.name, source = %id, "Cannot skip: {}", err);
            }
        }
    }

    /// Régénère le script du moteur puis les playlists.
    pub fn make_config(&mut self, store: &Store) -> Result<()> {
        let content = script::render(
            &self.station,
            &ScriptSources {
                master: self.master.id(),
                dealer: self.dealer.id(),
                playlists: &self.playlists,
            },
        );
        let path = self.station.config_path();
        script::write_script(&path, &content)?;
        info!(station = %self.station.name, "Engine script written to {}", path.display());
        self.sync(store)
    }

    /// Réécrit les playlists des programmes diffusés en continu.
    pub fn sync(&mut self, store: &Store) -> Result<()> {
        for playlist in &mut self.playlists {
            playlist.sync(store)?;
        }
        Ok(())
    }

    /// Lance le moteur sur le script de la station, après avoir tué les
    /// processus restés attachés à son socket.
    pub fn run_process(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let config = self.station.config_path();
        if !config.exists() {
            return Err(Error::process(format!(
                "no engine script at {}",
                config.display()
            )));
        }

        let socket = self.station.socket_path();
        self.kill_zombies(&socket);
        if socket.exists() {
            std::fs::remove_file(&socket)?;
        }

        let child = Command::new(&self.executable)
            .arg("-v")
            .arg(&config)
            .current_dir(&self.station.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|err| Error::process(format!("cannot run {}: {}", self.executable, err)))?;
        info!(
            station = %self.station.name,
            pid = child.id(),
            "Engine started: {} -v {}",
            self.executable,
            config.display()
        );
        self.process = Some(child);
        Ok(())
    }

    fn kill_zombies(&self, socket: &Path) {
        let own = std::process::id();
        for process in airutils::find_processes_bound_to_socket(socket) {
            if process.pid == own {
                continue;
            }
            warn!(
                station = %self.station.name,
                pid = process.pid,
                "Killing orphan engine {} bound to {}",
                process.process_name,
                socket.display()
            );
            airutils::kill_process(process.pid);
        }
    }

    /// Arrête le moteur lancé par [`Streamer::run_process`].
    pub fn kill_process(&mut self) {
        self.connector.close();
        if let Some(mut child) = self.process.take() {
            debug!(station = %self.station.name, pid = child.id(), "Killing engine");
            if let Err(err) = child.kill() {
                debug!(station = %self.station.name, "Engine already stopped: {}", err);
            }
            let _ = child.wait();
        }
    }

    /// Attend la fin du moteur.
    pub fn wait_process(&mut self) -> Result<Option<ExitStatus>> {
        match self.process.take() {
            Some(mut child) => Ok(Some(child.wait()?)),
            None => Ok(None),
        }
    }

    /// Le processus lancé tourne-t-il encore ? Un processus terminé est
    /// oublié.
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.process.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(station = %self.station.name, "Engine exited: {}", status);
                self.process = None;
                false
            }
            Err(err) => {
                warn!(station = %self.station.name, "Cannot poll engine: {}", err);
                false
            }
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.kill_process();
    }
}

//! Sources of the engine: per-program playlists, the dealer queue and the
//! master output.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use airmodels::{Program, Store, Stream};

use crate::connector::Connector;
use crate::metadata::{parse_rids, Metadata, Rid, Status};
use crate::Result;

/// What the last fetch told about a source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceState {
    pub rid: Option<Rid>,
    pub uri: Option<String>,
    pub status: Status,
    pub air_time: Option<DateTime<Utc>>,
    /// Seconds left in the current sound.
    pub remaining: Option<f64>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl SourceState {
    fn from_metadata(meta: Metadata, on_air: &[Rid]) -> Self {
        Self {
            status: meta.status_among(on_air),
            rid: meta.rid,
            uri: meta.uri,
            air_time: meta.air_time,
            remaining: None,
            title: meta.title,
            artist: meta.artist,
        }
    }
}

/// Common behaviour of the engine sources.
pub trait Source {
    /// Id of the source in the engine script.
    fn id(&self) -> &str;

    fn state(&self) -> &SourceState;

    /// Refreshes the state from the engine. `on_air` lists the request ids
    /// the engine currently outputs.
    fn fetch(&mut self, connector: &mut Connector, on_air: &[Rid]);

    fn is_playing(&self) -> bool {
        self.state().status == Status::Playing
    }

    /// Skips the current sound.
    fn skip(&self, connector: &mut Connector) -> Result<()> {
        debug!(source = self.id(), "Skip");
        connector.send(&format!("{}.skip", self.id())).map(|_| ())
    }

    fn seek(&self, connector: &mut Connector, seconds: i64) -> Result<()> {
        connector
            .send(&format!("{}.seek {}", self.id(), seconds))
            .map(|_| ())
    }

    /// Restarts the current sound: the engine has no way to tell the
    /// current position, so seek far enough backward.
    fn restart(&self, connector: &mut Connector) -> Result<()> {
        self.seek(connector, -216_000 * 10)
    }
}

/// `{id}.remaining` and `{id}.get`, shared by the concrete sources.
fn fetch_source_state(connector: &mut Connector, id: &str, on_air: &[Rid]) -> SourceState {
    let remaining = connector
        .send(&format!("{id}.remaining"))
        .ok()
        .and_then(|body| body.trim().parse::<f64>().ok());

    let metadata = connector
        .send_parsed(&format!("{id}.get"))
        .and_then(|data| Metadata::parse(&data));

    match metadata {
        Ok(meta) => SourceState {
            remaining,
            ..SourceState::from_metadata(meta, on_air)
        },
        Err(err) => {
            debug!(source = id, "Source degraded to stopped: {}", err);
            SourceState {
                remaining,
                ..SourceState::default()
            }
        }
    }
}

/// Playlist of a streamed program, played when nothing is scheduled.
pub struct PlaylistSource {
    id: String,
    pub program: Program,
    pub stream: Stream,
    path: PathBuf,
    playlist: Vec<PathBuf>,
    state: SourceState,
}

impl PlaylistSource {
    pub fn new(station_dir: &Path, program: Program, stream: Stream) -> Self {
        let id = program.slug.replace('-', "_");
        let path = station_dir.join(format!("{id}.m3u"));
        Self {
            id,
            program,
            stream,
            path,
            playlist: Vec::new(),
            state: SourceState::default(),
        }
    }

    /// Playlist file read by the engine.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn playlist(&self) -> &[PathBuf] {
        &self.playlist
    }

    /// Rewrites the playlist file from the program archives. Returns
    /// whether the playlist changed.
    pub fn sync(&mut self, store: &Store) -> Result<bool> {
        let playlist = store.program_playlist(self.program.id)?;
        if playlist == self.playlist && self.path.exists() {
            return Ok(false);
        }
        self.write_playlist(&playlist)?;
        info!(
            source = %self.id,
            sounds = playlist.len(),
            "Playlist written to {}",
            self.path.display()
        );
        self.playlist = playlist;
        Ok(true)
    }

    fn write_playlist(&self, playlist: &[PathBuf]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = playlist
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl Source for PlaylistSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> &SourceState {
        &self.state
    }

    fn fetch(&mut self, connector: &mut Connector, on_air: &[Rid]) {
        self.state = fetch_source_state(connector, &self.id, on_air);
    }
}

/// Metadata of a queued request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    pub rid: Rid,
    pub uri: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

/// The dealer: a queue of one-off requests behind an activation switch.
pub struct QueueSource {
    id: String,
    state: SourceState,
    queue: Vec<Rid>,
    active: bool,
}

impl QueueSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SourceState::default(),
            queue: Vec::new(),
            active: false,
        }
    }

    /// Pending request ids, the one on air excluded.
    pub fn queue(&self) -> &[Rid] {
        &self.queue
    }

    /// Activation switch, as read during the last fetch.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Appends sounds to the queue.
    pub fn push(&mut self, connector: &mut Connector, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            let body = connector.send(&format!("{}_queue.push {}", self.id, path.display()))?;
            if let Some(rid) = parse_rids(&body).first() {
                self.queue.push(*rid);
            }
        }
        Ok(())
    }

    /// Removes a pending request.
    pub fn remove(&mut self, connector: &mut Connector, rid: Rid) -> Result<()> {
        connector.send(&format!("{}_queue.remove {}", self.id, rid))?;
        self.queue.retain(|r| *r != rid);
        Ok(())
    }

    pub fn set_active(&mut self, connector: &mut Connector, active: bool) -> Result<()> {
        connector.send(&format!("var.set {}_active = {}", self.id, active))?;
        self.active = active;
        Ok(())
    }

    /// Metadata of the pending requests, in queue order. Requests whose
    /// metadata cannot be read keep only their id.
    pub fn requests(&self, connector: &mut Connector) -> Vec<Request> {
        self.queue
            .iter()
            .map(|rid| {
                let meta = connector
                    .send_parsed(&format!("request.metadata {rid}"))
                    .and_then(|data| Metadata::parse(&data));
                match meta {
                    Ok(meta) => Request {
                        rid: *rid,
                        uri: meta.uri,
                        title: meta.title,
                        artist: meta.artist,
                    },
                    Err(err) => {
                        warn!(source = %self.id, rid, "Cannot read request metadata: {}", err);
                        Request {
                            rid: *rid,
                            ..Request::default()
                        }
                    }
                }
            })
            .collect()
    }
}

impl Source for QueueSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> &SourceState {
        &self.state
    }

    fn fetch(&mut self, connector: &mut Connector, on_air: &[Rid]) {
        self.state = fetch_source_state(connector, &self.id, on_air);
        self.queue = connector
            .send(&format!("{}_queue.queue", self.id))
            .map(|body| parse_rids(&body))
            .unwrap_or_default();
        self.active = connector
            .send(&format!("var.get {}_active", self.id))
            .map(|body| body.trim() == "true")
            .unwrap_or(false);
    }
}

/// The station output: reports the request the engine has on air.
pub struct MasterSource {
    id: String,
    state: SourceState,
    on_air: Vec<Rid>,
}

impl MasterSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SourceState::default(),
            on_air: Vec::new(),
        }
    }

    /// Request ids on air, as of the last fetch.
    pub fn on_air(&self) -> &[Rid] {
        &self.on_air
    }

    /// Reads `request.on_air`. Must be called before fetching the other
    /// sources, which compare their request id to this list.
    pub fn fetch_on_air(&mut self, connector: &mut Connector) -> Result<&[Rid]> {
        let body = connector.send("request.on_air")?;
        self.on_air = parse_rids(&body);
        Ok(&self.on_air)
    }
}

impl Source for MasterSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> &SourceState {
        &self.state
    }

    fn fetch(&mut self, connector: &mut Connector, on_air: &[Rid]) {
        self.on_air = on_air.to_vec();
        // les rids sont croissants : le plus grand est la requête la plus récente
        let Some(rid) = on_air.iter().max().copied() else {
            self.state = SourceState::default();
            return;
        };
        let meta = connector
            .send_parsed(&format!("request.metadata {rid}"))
            .and_then(|data| Metadata::parse(&data));
        self.state = match meta {
            Ok(meta) => SourceState {
                rid: Some(rid),
                status: Status::Playing,
                ..SourceState::from_metadata(meta, on_air)
            },
            Err(_) => SourceState {
                rid: Some(rid),
                status: Status::Playing,
                ..SourceState::default()
            },
        };
    }
}

/// Picks the source on air: the playing source with the most recent air
/// time. `None` when nothing plays (silence or fallback file).
pub fn select_on_air<'a>(sources: &[&'a dyn Source]) -> Option<&'a dyn Source> {
    sources
        .iter()
        .copied()
        .filter(|s| s.is_playing() && s.state().air_time.is_some())
        .max_by_key(|s| s.state().air_time)
}

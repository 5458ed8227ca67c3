use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use airmodels::{
    Diffusion, DiffusionType, LogType, NewDiffusion, NewSound, NewTrack, SoundType, Station,
    Store, Stream,
};
use airmonitor::{Monitor, MonitorSettings};
use airstreamer::metadata::AIR_TIME_FORMAT;
use airstreamer::{Streamer, StreamerSettings};

/// State of the fake engine, shared with the test.
#[derive(Default)]
struct Engine {
    next_rid: u32,
    queue: Vec<(u32, String)>,
    dealer_active: bool,
    on_air: Option<u32>,
    /// `{source}.get` answers
    sources: HashMap<String, String>,
}

impl Engine {
    fn respond(&mut self, line: &str) -> String {
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "list" => "dealer : switch\nmaster : fallback".to_string(),
            "request.on_air" => self.on_air.map(|r| r.to_string()).unwrap_or_default(),
            "dealer_queue.queue" => self
                .queue
                .iter()
                .map(|(rid, _)| rid.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            "dealer_queue.push" => {
                self.next_rid += 1;
                self.queue.push((self.next_rid, arg.to_string()));
                self.next_rid.to_string()
            }
            "dealer_queue.remove" => {
                let rid: u32 = arg.parse().unwrap();
                self.queue.retain(|(r, _)| *r != rid);
                "OK".to_string()
            }
            "request.metadata" => {
                let rid: u32 = arg.parse().unwrap();
                match self.queue.iter().find(|(r, _)| *r == rid) {
                    Some((_, uri)) => format!("rid=\"{rid}\"\nstatus=\"ready\"\ninitial_uri=\"{uri}\""),
                    None => String::new(),
                }
            }
            "var.get" => self.dealer_active.to_string(),
            "var.set" => {
                self.dealer_active = arg.ends_with("true");
                format!("Variable dealer_active set to {}", self.dealer_active)
            }
            _ => match command.strip_suffix(".get") {
                Some(source) => self.sources.get(source).cloned().unwrap_or_default(),
                None => String::new(),
            },
        }
    }
}

fn serve(path: &Path, engine: Arc<Mutex<Engine>>) {
    let listener = UnixListener::bind(path).unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            handle(stream, &engine);
        }
    });
}

fn handle(stream: UnixStream, engine: &Mutex<Engine>) {
    let mut writer = stream.try_clone().unwrap();
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { return };
        let body = engine.lock().unwrap().respond(line.trim());
        if writer.write_all(format!("{body}\nEND\n").as_bytes()).is_err() {
            return;
        }
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    station: Station,
    engine: Arc<Mutex<Engine>>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("airstation.db")).unwrap());
        let station = store
            .insert_station("Radio Campus", &dir.path().join("station"))
            .unwrap();
        std::fs::create_dir_all(&station.path).unwrap();
        let engine = Arc::new(Mutex::new(Engine::default()));
        serve(&station.socket_path(), engine.clone());
        Self {
            _dir: dir,
            store,
            station,
            engine,
        }
    }

    fn monitor(&self) -> Monitor {
        let settings = StreamerSettings {
            timeout: std::time::Duration::from_secs(2),
            ..StreamerSettings::default()
        };
        let streamer = Streamer::from_store(&self.store, self.station.clone(), settings).unwrap();
        Monitor::new(
            streamer,
            self.store.clone(),
            MonitorSettings {
                cancel_timeout: Duration::seconds(600),
                ..MonitorSettings::default()
            },
        )
    }

    /// A normal diffusion of 30 minutes starting at `start`, with two
    /// archives.
    fn diffusion(&self, start: DateTime<Utc>) -> (Diffusion, Vec<PathBuf>) {
        self.diffusion_of("Morning", "/srv/morning", start)
    }

    fn diffusion_of(&self, name: &str, dir: &str, start: DateTime<Utc>) -> (Diffusion, Vec<PathBuf>) {
        let program = self
            .store
            .insert_program(self.station.id, name, Path::new(dir), true)
            .unwrap();
        let diffusion = self
            .store
            .insert_diffusion(&NewDiffusion {
                program_id: program.id,
                start,
                end: start + Duration::seconds(1800),
                kind: DiffusionType::Normal,
                initial_id: None,
            })
            .unwrap();
        let paths: Vec<PathBuf> = ["a.mp3", "b.mp3"]
            .iter()
            .map(|name| Path::new(dir).join("archives").join(name))
            .collect();
        for path in &paths {
            self.store
                .insert_sound(&NewSound {
                    program_id: program.id,
                    diffusion_id: Some(diffusion.id),
                    path: path.clone(),
                    kind: SoundType::Archive,
                })
                .unwrap();
        }
        (diffusion, paths)
    }

    /// The engine pops the head of the dealer queue and plays it from
    /// `air_time`.
    fn play_next_queued(&self, air_time: DateTime<Utc>) {
        let mut engine = self.engine.lock().unwrap();
        let (rid, uri) = engine.queue.remove(0);
        let local = air_time.with_timezone(&Local).format(AIR_TIME_FORMAT);
        engine.on_air = Some(rid);
        engine.sources.insert(
            "dealer".into(),
            format!("rid=\"{rid}\"\nstatus=\"playing\"\ninitial_uri=\"{uri}\"\non_air=\"{local}\""),
        );
    }

    fn count_logs(&self, kind: LogType) -> usize {
        self.store
            .logs_of_station(self.station.id)
            .unwrap()
            .iter()
            .filter(|log| log.kind == kind)
            .count()
    }

    fn queued(&self) -> Vec<String> {
        let engine = self.engine.lock().unwrap();
        engine.queue.iter().map(|(_, uri)| uri.clone()).collect()
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
}

fn paths_as_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.to_string_lossy().into_owned()).collect()
}

#[test]
fn test_scheduled_diffusion_starts_once() {
    let fixture = Fixture::new();
    let (diffusion, paths) = fixture.diffusion(start());
    let mut monitor = fixture.monitor();

    monitor.tick_at(start() + Duration::seconds(5)).unwrap();

    assert_eq!(fixture.queued(), paths_as_strings(&paths));
    assert!(fixture.engine.lock().unwrap().dealer_active);
    assert_eq!(fixture.count_logs(LogType::Start), 1);
    assert_eq!(fixture.count_logs(LogType::Load), 1);
    let start_log = fixture
        .store
        .start_log_of(fixture.station.id, diffusion.id)
        .unwrap()
        .unwrap();
    assert!(start_log.date >= start());
    assert_eq!(start_log.source, "dealer");

    monitor.tick_at(start() + Duration::seconds(10)).unwrap();

    assert_eq!(fixture.count_logs(LogType::Start), 1);
    assert_eq!(fixture.count_logs(LogType::Load), 1);
    assert_eq!(fixture.queued(), paths_as_strings(&paths));
}

#[test]
fn test_future_diffusion_is_not_started() {
    let fixture = Fixture::new();
    fixture.diffusion(start());
    let mut monitor = fixture.monitor();

    monitor.tick_at(start() - Duration::seconds(30)).unwrap();

    assert!(fixture.queued().is_empty());
    assert_eq!(fixture.count_logs(LogType::Start), 0);
}

#[test]
fn test_stale_diffusion_is_canceled_once() {
    let fixture = Fixture::new();
    let (diffusion, _) = fixture.diffusion(start());
    let mut monitor = fixture.monitor();

    monitor.tick_at(start() + Duration::seconds(601)).unwrap();

    assert_eq!(
        fixture.store.diffusion(diffusion.id).unwrap().kind,
        DiffusionType::Canceled
    );
    assert_eq!(fixture.count_logs(LogType::Cancel), 1);
    assert_eq!(fixture.count_logs(LogType::Start), 0);
    assert!(fixture.queued().is_empty());

    monitor.tick_at(start() + Duration::seconds(602)).unwrap();
    assert_eq!(fixture.count_logs(LogType::Cancel), 1);
}

#[test]
fn test_stale_queue_is_replaced() {
    let fixture = Fixture::new();
    let (_, paths) = fixture.diffusion(start());
    {
        let mut engine = fixture.engine.lock().unwrap();
        engine.next_rid = 1;
        engine.queue.push((1, "/srv/other/old.mp3".to_string()));
    }
    let mut monitor = fixture.monitor();

    monitor.tick_at(start() + Duration::seconds(5)).unwrap();

    assert_eq!(fixture.queued(), paths_as_strings(&paths));
}

#[test]
fn test_unreachable_engine_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("airstation.db")).unwrap());
    let station = store
        .insert_station("Radio Campus", &dir.path().join("station"))
        .unwrap();
    let streamer = Streamer::from_store(&store, station.clone(), StreamerSettings::default()).unwrap();
    let mut monitor = Monitor::new(streamer, store.clone(), MonitorSettings::default());

    monitor.tick_at(start()).unwrap();
    assert!(store.logs_of_station(station.id).unwrap().is_empty());
}

#[test]
fn test_streamed_sound_and_tracks_are_traced() {
    let fixture = Fixture::new();
    let program = fixture
        .store
        .insert_program(fixture.station.id, "Night Jazz", Path::new("/srv/jazz"), true)
        .unwrap();
    fixture
        .store
        .set_stream(&Stream {
            program_id: program.id,
            begin: None,
            end: None,
            delay: None,
        })
        .unwrap();
    let path = "/srv/jazz/archives/set.mp3";
    let sound = fixture
        .store
        .insert_sound(&NewSound {
            program_id: program.id,
            diffusion_id: None,
            path: PathBuf::from(path),
            kind: SoundType::Archive,
        })
        .unwrap();
    for (position, timestamp) in [(0, 0), (1, 60), (2, 600)] {
        fixture
            .store
            .insert_track(&NewTrack {
                sound_id: sound.id,
                position,
                timestamp: Some(timestamp),
                title: format!("track {position}"),
                artist: "Quartet".into(),
            })
            .unwrap();
    }

    let air_time = start();
    let local = air_time.with_timezone(&Local).format(AIR_TIME_FORMAT);
    {
        let mut engine = fixture.engine.lock().unwrap();
        engine.on_air = Some(7);
        engine.sources.insert(
            "night_jazz".into(),
            format!("rid=\"7\"\nstatus=\"playing\"\ninitial_uri=\"{path}\"\non_air=\"{local}\""),
        );
    }
    let mut monitor = fixture.monitor();

    monitor.tick_at(air_time + Duration::seconds(90)).unwrap();
    // le son et ses deux premières pistes
    assert_eq!(fixture.count_logs(LogType::OnAir), 3);

    monitor.tick_at(air_time + Duration::seconds(100)).unwrap();
    assert_eq!(fixture.count_logs(LogType::OnAir), 3);

    monitor.tick_at(air_time + Duration::seconds(601)).unwrap();
    let logs = fixture.store.logs_of_station(fixture.station.id).unwrap();
    let on_air: Vec<_> = logs.iter().filter(|l| l.kind == LogType::OnAir).collect();
    assert_eq!(on_air.len(), 4);
    assert_eq!(on_air[0].sound_id, Some(sound.id));
    assert_eq!(on_air[0].track_id, None);
    assert_eq!(on_air[0].source, "night_jazz");
    assert!(on_air[1..].iter().all(|l| l.track_id.is_some()));
    assert_eq!(on_air[3].date, air_time + Duration::seconds(600));
}

#[test]
fn test_canceled_diffusion_stops_dealer() {
    let fixture = Fixture::new();
    let (diffusion, paths) = fixture.diffusion(start());
    let mut monitor = fixture.monitor();

    monitor.tick_at(start() + Duration::seconds(5)).unwrap();
    assert_eq!(fixture.queued(), paths_as_strings(&paths));

    fixture
        .store
        .set_diffusion_type(diffusion.id, DiffusionType::Canceled)
        .unwrap();
    monitor.tick_at(start() + Duration::seconds(60)).unwrap();

    assert!(fixture.queued().is_empty());
    assert!(!fixture.engine.lock().unwrap().dealer_active);
    assert_eq!(fixture.count_logs(LogType::Stop), 1);

    monitor.tick_at(start() + Duration::seconds(1900)).unwrap();
    assert_eq!(fixture.count_logs(LogType::Stop), 1);
    assert_eq!(fixture.count_logs(LogType::Load), 1);
}

#[test]
fn test_ended_diffusion_clears_dealer() {
    let fixture = Fixture::new();
    fixture.diffusion(start());
    let mut monitor = fixture.monitor();

    monitor.tick_at(start() + Duration::seconds(5)).unwrap();
    monitor.tick_at(start() + Duration::seconds(1900)).unwrap();

    assert!(fixture.queued().is_empty());
    assert!(!fixture.engine.lock().unwrap().dealer_active);
    assert_eq!(fixture.count_logs(LogType::Stop), 1);
    assert_eq!(fixture.count_logs(LogType::Cancel), 0);
}

#[test]
fn test_dealer_keeps_remaining_sounds() {
    let fixture = Fixture::new();
    let (diffusion, paths) = fixture.diffusion(start());
    let mut monitor = fixture.monitor();

    monitor.tick_at(start() + Duration::seconds(5)).unwrap();
    fixture.play_next_queued(start() + Duration::seconds(6));
    monitor.tick_at(start() + Duration::seconds(10)).unwrap();

    let logs = fixture.store.logs_of_station(fixture.station.id).unwrap();
    let on_air: Vec<_> = logs.iter().filter(|l| l.kind == LogType::OnAir).collect();
    assert_eq!(on_air.len(), 1);
    assert_eq!(on_air[0].source, "dealer");
    assert_eq!(on_air[0].diffusion_id, Some(diffusion.id));

    // le son en cours n'est pas remis dans la file
    assert_eq!(fixture.queued(), paths_as_strings(&paths[1..]));
    assert_eq!(fixture.count_logs(LogType::Load), 1);
    assert!(fixture.engine.lock().unwrap().dealer_active);
    assert_eq!(fixture.count_logs(LogType::Stop), 0);
}

#[test]
fn test_next_diffusion_is_chained_behind_current() {
    let fixture = Fixture::new();
    let (first, first_paths) = fixture.diffusion(start());
    let (second, second_paths) =
        fixture.diffusion_of("Evening", "/srv/evening", start() + Duration::seconds(1500));
    let mut monitor = fixture.monitor();

    monitor.tick_at(start() + Duration::seconds(5)).unwrap();
    assert_eq!(fixture.queued(), paths_as_strings(&first_paths));

    monitor.tick_at(start() + Duration::seconds(10)).unwrap();
    let mut expected = paths_as_strings(&first_paths);
    expected.extend(paths_as_strings(&second_paths));
    assert_eq!(fixture.queued(), expected);
    assert_eq!(fixture.count_logs(LogType::Load), 2);
    assert!(fixture
        .store
        .start_log_of(fixture.station.id, second.id)
        .unwrap()
        .is_none());

    monitor.tick_at(start() + Duration::seconds(1500)).unwrap();
    assert!(fixture
        .store
        .start_log_of(fixture.station.id, first.id)
        .unwrap()
        .is_some());
    assert!(fixture
        .store
        .start_log_of(fixture.station.id, second.id)
        .unwrap()
        .is_some());
    assert_eq!(fixture.count_logs(LogType::Start), 2);
    assert_eq!(fixture.count_logs(LogType::Load), 2);
    assert_eq!(fixture.queued(), expected);
}

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use airstreamer::{Address, Connector, QueueSource, Source};

/// Serves `connections` connections, answering each command line with
/// `respond(line)`; `None` drops the connection without answering.
fn serve<F>(path: &Path, connections: usize, respond: F) -> thread::JoinHandle<()>
where
    F: Fn(&str) -> Option<String> + Send + 'static,
{
    let listener = UnixListener::bind(path).unwrap();
    thread::spawn(move || {
        for stream in listener.incoming().take(connections) {
            let stream = stream.unwrap();
            handle(stream, &respond);
        }
    })
}

fn handle<F: Fn(&str) -> Option<String>>(stream: UnixStream, respond: &F) {
    let mut writer = stream.try_clone().unwrap();
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { return };
        match respond(&line) {
            Some(body) => {
                writer.write_all(body.as_bytes()).unwrap();
                writer.write_all(b"\nEND\n").unwrap();
            }
            None => return,
        }
    }
}

fn connector(path: &Path) -> Connector {
    Connector::with_settings(Address::Unix(path.to_path_buf()), Duration::from_secs(2), 1)
}

#[test]
fn test_send_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.sock");
    let server = serve(&path, 1, |line| match line {
        "dealer.get" => Some("key=\"v1\" other=\"v2\"".to_string()),
        _ => Some(String::new()),
    });

    let mut connector = connector(&path);
    let data = connector.send_parsed("dealer.get").unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data["key"], "v1");
    assert_eq!(data["other"], "v2");

    // la connexion reste ouverte entre deux commandes
    assert!(connector.is_open());
    assert_eq!(connector.send("list").unwrap(), "");
    connector.close();
    server.join().unwrap();
}

#[test]
fn test_send_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.sock");
    let server = serve(&path, 1, |_| Some("\"42\"".to_string()));

    let mut connector = connector(&path);
    assert_eq!(connector.send_json("dealer.remaining").unwrap(), serde_json::json!(42));
    connector.close();
    server.join().unwrap();
}

#[test]
fn test_send_retries_on_fresh_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let server = thread::spawn(move || {
        let mut incoming = listener.incoming();
        // première connexion fermée sans réponse
        let first = incoming.next().unwrap().unwrap();
        let mut line = String::new();
        BufReader::new(&first).read_line(&mut line).unwrap();
        drop(first);
        let second = incoming.next().unwrap().unwrap();
        handle(second, &|line: &str| Some(format!("{line} ok")));
    });

    let mut connector = connector(&path);
    assert_eq!(connector.send("request.on_air").unwrap(), "request.on_air ok");
    connector.close();
    server.join().unwrap();
}

#[test]
fn test_send_gives_up_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.sock");
    let server = serve(&path, 2, |_| None);

    let mut connector = connector(&path);
    assert!(connector.send("list").is_err());
    assert!(!connector.is_open());
    server.join().unwrap();
}

#[test]
fn test_source_controls() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.sock");
    let received = Arc::new(Mutex::new(Vec::new()));
    let lines = received.clone();
    let server = serve(&path, 1, move |line| {
        lines.lock().unwrap().push(line.to_string());
        Some("Done".to_string())
    });

    let mut connector = connector(&path);
    let dealer = QueueSource::new("dealer");
    dealer.skip(&mut connector).unwrap();
    dealer.seek(&mut connector, 30).unwrap();
    dealer.restart(&mut connector).unwrap();
    connector.close();
    server.join().unwrap();

    assert_eq!(
        *received.lock().unwrap(),
        ["dealer.skip", "dealer.seek 30", "dealer.seek -2160000"]
    );
}

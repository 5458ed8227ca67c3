//! Line protocol client of the audio engine.
//!
//! Every command is one line; every response ends with a line `END`. The
//! body is either `key="value"` pairs or a JSON document (sometimes wrapped
//! in one extra pair of quotes).

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRIES: u32 = 1;

static RESPONSE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A(?:(.*)\s)?END\s*\z").expect("valid regex"));

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^=\s]+)=(?:"((?:[^"\\]|\\.)*)"|(\S*))"#).expect("valid regex")
});

/// Where the engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Unix(PathBuf),
    Tcp(String, u16),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

enum Socket {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Socket {
    fn connect(address: &Address, timeout: Duration) -> io::Result<Self> {
        match address {
            Address::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                Ok(Self::Unix(stream))
            }
            Address::Tcp(host, port) => {
                let mut last_err = None;
                for addr in (host.as_str(), *port).to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(stream) => {
                            stream.set_read_timeout(Some(timeout))?;
                            stream.set_write_timeout(Some(timeout))?;
                            return Ok(Self::Tcp(stream));
                        }
                        Err(err) => last_err = Some(err),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))
                }))
            }
        }
    }

    fn shutdown(&self) {
        let _ = match self {
            Self::Unix(s) => s.shutdown(Shutdown::Both),
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
        };
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.read(buf),
            Self::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.write(buf),
            Self::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.flush(),
            Self::Tcp(s) => s.flush(),
        }
    }
}

/// Connection to the engine control socket.
///
/// The socket is opened on first use and kept open until an I/O error
/// closes it; the next call reopens it.
pub struct Connector {
    address: Address,
    timeout: Duration,
    retries: u32,
    socket: Option<Socket>,
}

impl Connector {
    pub fn new(address: Address) -> Self {
        Self::with_settings(address, DEFAULT_TIMEOUT, DEFAULT_RETRIES)
    }

    pub fn with_settings(address: Address, timeout: Duration, retries: u32) -> Self {
        Self {
            address,
            timeout,
            retries,
            socket: None,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Opens the socket if it is not already.
    pub fn open(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        match Socket::connect(&self.address, self.timeout) {
            Ok(socket) => {
                debug!(address = %self.address, "Connected to engine");
                self.socket = Some(socket);
                Ok(())
            }
            Err(err) => {
                debug!(address = %self.address, "Cannot connect to engine: {}", err);
                Err(Error::Unavailable(format!("{}: {}", self.address, err)))
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.shutdown();
        }
    }

    /// Sends one command and returns the response body, without its `END`
    /// terminator.
    ///
    /// On failure the connection is closed and the command is sent again
    /// on a fresh connection, up to the configured number of retries.
    pub fn send(&mut self, command: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.exchange(command) {
                Ok(body) => return Ok(body),
                Err(err) => {
                    self.close();
                    if attempt >= self.retries {
                        warn!(address = %self.address, command, "Engine command failed: {}", err);
                        return Err(err);
                    }
                    debug!(command, attempt, "Retrying engine command: {}", err);
                    attempt += 1;
                }
            }
        }
    }

    /// Sends a command whose response is made of `key="value"` pairs.
    pub fn send_parsed(&mut self, command: &str) -> Result<HashMap<String, String>> {
        self.send(command).map(|body| parse_key_values(&body))
    }

    /// Sends a command whose response is a JSON document.
    pub fn send_json(&mut self, command: &str) -> Result<serde_json::Value> {
        let body = self.send(command)?;
        parse_json(&body)
    }

    fn exchange(&mut self, command: &str) -> Result<String> {
        self.open()?;
        let Some(socket) = self.socket.as_mut() else {
            return Err(Error::Unavailable(self.address.to_string()));
        };

        trace!(command, "-> engine");
        socket.write_all(command.trim_end().as_bytes())?;
        socket.write_all(b"\n")?;
        socket.flush()?;

        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf)?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "engine closed the connection",
                )));
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(body) = strip_terminator(&String::from_utf8_lossy(&data)) {
                trace!(response = %body, "<- engine");
                return Ok(body);
            }
        }
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.close();
    }
}

/// Returns the body of a complete response, `None` while the terminator
/// has not been received yet.
pub fn strip_terminator(data: &str) -> Option<String> {
    RESPONSE_END.captures(data).map(|caps| {
        caps.get(1)
            .map(|body| body.as_str().trim().to_string())
            .unwrap_or_default()
    })
}

/// Parses `key="value"` (or `key=value`) pairs separated by whitespace.
/// Escaped quotes inside values are unescaped.
pub fn parse_key_values(body: &str) -> HashMap<String, String> {
    KEY_VALUE
        .captures_iter(body)
        .map(|caps| {
            let value = match (caps.get(2), caps.get(3)) {
                (Some(quoted), _) => unescape(quoted.as_str()),
                (None, Some(raw)) => raw.as_str().to_string(),
                (None, None) => String::new(),
            };
            (caps[1].to_string(), value)
        })
        .collect()
}

/// Parses a JSON body, stripping one outer pair of quotes first.
pub fn parse_json(body: &str) -> Result<serde_json::Value> {
    let body = body.trim();
    let inner = body
        .strip_prefix('"')
        .and_then(|b| b.strip_suffix('"'))
        .unwrap_or(body);
    match serde_json::from_str(inner) {
        Ok(value) => Ok(value),
        Err(_) if inner != body => Ok(serde_json::from_str(&unescape(inner))?),
        Err(err) => Err(err.into()),
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

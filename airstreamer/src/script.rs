//! Génération du script du moteur audio d'une station.

use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use airmodels::Station;

use crate::source::{PlaylistSource, Source};

static TRAILING_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\t ]+\n").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Sources à déclarer dans le script
pub struct ScriptSources<'a> {
    pub master: &'a str,
    pub dealer: &'a str,
    pub playlists: &'a [PlaylistSource],
}

/// Produit le script de la station.
///
/// Les sorties (icecast, carte son...) ne sont pas générées : si le fichier
/// `outputs.liq` existe dans le répertoire de la station il est inclus,
/// sinon la sortie est muette.
pub fn render(station: &Station, sources: &ScriptSources<'_>) -> String {
    collapse_blank_lines(&Script { station, sources }.to_string())
}

struct Script<'a> {
    station: &'a Station,
    sources: &'a ScriptSources<'a>,
}

impl fmt::Display for Script<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let station = self.station;
        let sources = self.sources;
        let master = sources.master;
        let dealer = sources.dealer;

        writeln!(out, "#!/usr/bin/env liquidsoap")?;
        writeln!(out, "# {} -- generated by airstation, do not edit", station.name)?;
        writeln!(out)?;
        writeln!(out, "set(\"server.socket\", true)")?;
        writeln!(
            out,
            "set(\"server.socket.path\", {})",
            quote(&station.socket_path().to_string_lossy())
        )?;
        writeln!(
            out,
            "set(\"log.file.path\", {})",
            quote(&station.path.join("station.log").to_string_lossy())
        )?;
        writeln!(out)?;
        writeln!(out, "def stream(id, file) =")?;
        writeln!(
            out,
            "    playlist(id=id, mode=\"randomize\", reload_mode=\"watch\", file)"
        )?;
        writeln!(out, "end")?;
        writeln!(out)?;

        // dealer : file de requêtes derrière un interrupteur
        writeln!(out, "{dealer}_active = interactive.bool(\"{dealer}_active\", false)")?;
        writeln!(
            out,
            "{dealer} = switch(id=\"{dealer}\", track_sensitive=false, ["
        )?;
        writeln!(out, "    ({dealer}_active, request.queue(id=\"{dealer}_queue\")),")?;
        writeln!(out, "])")?;
        writeln!(out)?;

        let mut streams = Vec::new();
        for playlist in sources.playlists {
            let id = playlist.id();
            writeln!(
                out,
                "{id} = stream(\"{id}\", {})",
                quote(&playlist.path().to_string_lossy())
            )?;
            if let Some(delay) = playlist.stream.delay.filter(|d| *d > 0) {
                writeln!(out, "{id} = delay({delay}., {id})")?;
            }
            if let (Some(begin), Some(end)) = (playlist.stream.begin, playlist.stream.end) {
                writeln!(
                    out,
                    "{id} = switch(track_sensitive=true, [({{{}-{}}}, {id})])",
                    begin.format("%Hh%M"),
                    end.format("%Hh%M")
                )?;
            }
            writeln!(out)?;
            streams.push(id.to_string());
        }

        if streams.is_empty() {
            writeln!(out, "streams = blank(id=\"streams\")")?;
        } else {
            writeln!(out, "streams = rotate(id=\"streams\", [{}])", streams.join(", "))?;
        }
        writeln!(out)?;

        writeln!(
            out,
            "{master} = fallback(id=\"{master}\", track_sensitive=false, ["
        )?;
        writeln!(out, "    {dealer},")?;
        writeln!(out, "    streams,")?;
        writeln!(out, "    blank(id=\"security\"),")?;
        writeln!(out, "])")?;
        writeln!(out)?;

        let outputs = station.path.join("outputs.liq");
        if outputs.exists() {
            writeln!(out, "%include {}", quote(&outputs.to_string_lossy()))?;
        } else {
            writeln!(out, "output.dummy(fallible=true, {master})")?;
        }
        Ok(())
    }
}

/// Supprime les espaces en fin de ligne et fusionne les lignes vides.
pub fn collapse_blank_lines(text: &str) -> String {
    let text = TRAILING_SPACES.replace_all(text, "\n");
    BLANK_LINES.replace_all(&text, "\n\n").into_owned()
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Écrit `content` dans `path` en créant le répertoire parent.
pub(crate) fn write_script(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

//! Read-only view over finished downloads.
//!
//! Every `.mkv`/`.mp4` in `final/` is a library entry. A sidecar
//! `metadata/<name>.json` with the same base name, when present and valid,
//! supplies titles and numbering; otherwise the file name stands in.

use crate::core::assembler::MediaLayout;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::debug;

const MEDIA_EXTENSIONS: [&str; 2] = ["mkv", "mp4"];
const UNKNOWN_SHOW: &str = "Onbekend";

/// `S02E05 - Title` or `E05 - Title`, anywhere in the base name.
static NUMBERED_EPISODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:S(\d+))?E(\d+)\s*-\s*(.+)").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airing: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryFile {
    pub name: String,
    pub size: u64,
    /// Modification time in milliseconds since the epoch.
    pub mtime: u64,
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEpisode {
    pub filename: String,
    pub episode_number: u32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airing: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Value>,
    pub size: u64,
    pub mtime: u64,
    pub full_metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibrarySeason {
    pub number: u32,
    pub episodes: Vec<LibraryEpisode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryShow {
    pub title: String,
    pub seasons: Vec<LibrarySeason>,
}

/// One media file plus whatever its sidecar said.
struct Scanned {
    name: String,
    base: String,
    size: u64,
    mtime: u64,
    sidecar: Map<String, Value>,
}

impl Scanned {
    fn text(&self, key: &str) -> Option<String> {
        match self.sidecar.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Accepts numbers and numeric strings; zero counts as absent.
    fn number(&self, key: &str) -> Option<u32> {
        let n = match self.sidecar.get(key)? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        n.filter(|n| *n > 0)
    }

    fn raw(&self, key: &str) -> Option<Value> {
        self.sidecar.get(key).filter(|v| !v.is_null()).cloned()
    }
}

/// Finished files, newest first.
pub async fn list_downloads(layout: &MediaLayout) -> std::io::Result<Vec<LibraryFile>> {
    let mut files: Vec<LibraryFile> = scan(layout)
        .await?
        .into_iter()
        .map(|s| LibraryFile {
            metadata: FileMetadata {
                title: s.text("title").unwrap_or_else(|| s.base.clone()),
                episode_number: s.number("episodeNumber"),
                season_number: s.number("seasonNumber"),
                series_title: s.text("seriesTitle"),
                description: s.text("description"),
                airing: s.raw("airing"),
                duration: s.raw("duration"),
            },
            name: s.name,
            size: s.size,
            mtime: s.mtime,
        })
        .collect();

    files.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Finished files grouped by show and season. Shows are ordered by title,
/// seasons by number and episodes by episode number.
pub async fn shows_hierarchy(layout: &MediaLayout) -> std::io::Result<Vec<LibraryShow>> {
    let mut shows: BTreeMap<String, BTreeMap<u32, Vec<LibraryEpisode>>> = BTreeMap::new();

    for s in scan(layout).await? {
        let title = s.text("title");
        let mut season = s.number("seasonNumber").unwrap_or(1);
        let mut episode = s.number("episodeNumber").unwrap_or(1);
        let mut episode_title = title.clone().unwrap_or_else(|| s.base.clone());
        let show = s.text("seriesTitle").or(title).unwrap_or_else(|| UNKNOWN_SHOW.to_string());

        if let Some(caps) = NUMBERED_EPISODE.captures(&s.base) {
            if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                season = n;
            }
            if let Some(n) = caps.get(2).and_then(|m| m.as_str().parse().ok()) {
                episode = n;
            }
            if let Some(t) = caps.get(3) {
                episode_title = t.as_str().trim().to_string();
            }
        }

        let entry = LibraryEpisode {
            episode_number: episode,
            title: episode_title,
            description: s.text("description"),
            airing: s.raw("airing"),
            duration: s.raw("duration"),
            size: s.size,
            mtime: s.mtime,
            full_metadata: Value::Object(s.sidecar),
            filename: s.name,
        };
        shows.entry(show).or_default().entry(season).or_default().push(entry);
    }

    Ok(shows
        .into_iter()
        .map(|(title, seasons)| LibraryShow {
            title,
            seasons: seasons
                .into_iter()
                .map(|(number, mut episodes)| {
                    episodes.sort_by(|a, b| a.episode_number.cmp(&b.episode_number).then_with(|| a.filename.cmp(&b.filename)));
                    LibrarySeason { number, episodes }
                })
                .collect(),
        })
        .collect())
}

async fn scan(layout: &MediaLayout) -> std::io::Result<Vec<Scanned>> {
    let mut entries = match tokio::fs::read_dir(&layout.final_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e),
    };

    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let Some(base) = media_base_name(&path) else {
            continue;
        };

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis() as u64);
        let sidecar = read_sidecar(&layout.metadata_dir.join(format!("{base}.json"))).await;

        out.push(Scanned { name, base, size: meta.len(), mtime, sidecar });
    }
    Ok(out)
}

fn media_base_name(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    if !MEDIA_EXTENSIONS.contains(&ext) {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

/// A missing or unreadable sidecar is the same as an empty one.
async fn read_sidecar(path: &Path) -> Map<String, Value> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(_) => return Map::new(),
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            debug!("ignoring unreadable metadata {}: {e}", path.display());
            Map::new()
        }
    }
}

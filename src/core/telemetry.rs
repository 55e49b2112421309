//! Turns raw tool output lines into [`ProgressSample`]s.
//!
//! The segment fetcher prints yt-dlp style lines
//! (`[download]  45.2% of 280.5MiB at 2.5MiB/s ETA 01:30`), the remuxer
//! prints ffmpeg status lines (`... time=00:01:30.45 ... speed=2.5x`).

use crate::core::model::{ProgressSample, Stage};
use once_cell::sync::Lazy;
use regex::Regex;

/// Which external tool produced a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    SegmentFetch,
    Remux,
}

impl ToolKind {
    /// The remuxer reports its progress on stderr; the fetcher on stdout.
    pub fn parses_stderr(self) -> bool {
        matches!(self, ToolKind::Remux)
    }
}

static FETCH_PROGRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*([\d.]+\s*[KMGTP]?i?B)\b)?.*?([\d.]+\s*[KMGTP]?i?B/s).*?ETA\s+([\d:]+)",
    )
    .unwrap()
});

static FETCH_DONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|[\s\]])100(?:\.0+)?%").unwrap());

static FETCH_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:total[\s_-]*size|filesize)\b\s*[:=]?\s*~?\s*([\d.]+\s*[KMGTP]?i?B)\b").unwrap()
});

static REMUX_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=\s*([\d:.]+).*?speed=\s*([\d.]+)x").unwrap());

pub fn parse_line(kind: ToolKind, line: &str) -> Option<ProgressSample> {
    match kind {
        ToolKind::SegmentFetch => parse_fetch_line(line),
        ToolKind::Remux => parse_remux_line(line),
    }
}

pub fn parse_fetch_line(line: &str) -> Option<ProgressSample> {
    if let Some(caps) = FETCH_PROGRESS.captures(line) {
        let percentage = caps[1].parse::<f64>().ok()?;
        return Some(ProgressSample {
            percentage: Some(percentage),
            stage: Some(Stage::Downloading),
            speed: Some(caps[3].to_string()),
            eta: Some(caps[4].to_string()),
            total_size: caps.get(2).map(|m| m.as_str().to_string()),
            ..Default::default()
        });
    }

    if FETCH_DONE.is_match(line) {
        return Some(ProgressSample {
            percentage: Some(100.0),
            stage: Some(Stage::Completed),
            speed: Some("0".to_string()),
            eta: Some("00:00".to_string()),
            ..Default::default()
        });
    }

    FETCH_SIZE.captures(line).map(|caps| ProgressSample {
        total_size: Some(caps[1].to_string()),
        ..Default::default()
    })
}

pub fn parse_remux_line(line: &str) -> Option<ProgressSample> {
    let caps = REMUX_PROGRESS.captures(line)?;
    Some(ProgressSample {
        time: Some(caps[1].to_string()),
        speed: Some(format!("{}x", &caps[2])),
        stage: Some(Stage::Merging),
        ..Default::default()
    })
}

/// Decides which percentages are worth a log line: one per 5-point bucket,
/// plus every 100.
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    last: Option<f64>,
}

impl ProgressThrottle {
    pub fn should_surface(&mut self, percentage: f64) -> bool {
        let surface = match self.last {
            None => true,
            Some(_) if percentage >= 100.0 => true,
            Some(prev) => (percentage / 5.0).floor() != (prev / 5.0).floor(),
        };
        if surface {
            self.last = Some(percentage);
        }
        surface
    }
}

use crate::core::assembler::{MediaLayout, TrackPaths};
use crate::core::runner::Invocation;
use crate::core::telemetry::ToolKind;
use std::path::Path;

/// External tool binaries and their fixed options.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub fetch_bin: String,
    pub remux_bin: String,
    pub external_downloader: Option<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            fetch_bin: "yt-dlp".to_string(),
            remux_bin: "ffmpeg".to_string(),
            external_downloader: Some("aria2c".to_string()),
        }
    }
}

/// Reduces a resolver token to the bare decryption key.
///
/// Compound `kid:key` tokens keep only what follows the first `:`. An absent
/// or empty token means the tracks are clear and need no key.
pub fn normalize_decryption_key(token: Option<&str>) -> Option<String> {
    let token = token?.trim();
    let key = match token.split_once(':') {
        Some((_, key)) => key,
        None => token,
    };
    (!key.is_empty()).then(|| key.to_string())
}

pub fn plan_fetch(tools: &ToolSettings, layout: &MediaLayout, filename: &str, track_url: &str) -> Invocation {
    let mut args = vec!["--allow-u".to_string()];
    if let Some(dl) = &tools.external_downloader {
        args.push("--downloader".to_string());
        args.push(dl.clone());
    }
    args.extend([
        "-f".to_string(),
        "bv,ba".to_string(),
        "-P".to_string(),
        layout.temp_dir.display().to_string(),
        "-o".to_string(),
        layout.output_template(filename),
        track_url.to_string(),
    ]);

    Invocation { program: tools.fetch_bin.clone(), args, kind: ToolKind::SegmentFetch }
}

/// Copy-remux of both tracks, decrypting each input when a key is present.
pub fn plan_remux(tools: &ToolSettings, tracks: &TrackPaths, output: &Path, key: Option<&str>) -> Invocation {
    let mut args = Vec::with_capacity(11);
    for input in [&tracks.video, &tracks.audio] {
        if let Some(k) = key {
            args.push("-decryption_key".to_string());
            args.push(k.to_string());
        }
        args.push("-i".to_string());
        args.push(input.display().to_string());
    }
    args.extend(["-c".to_string(), "copy".to_string(), output.display().to_string()]);

    Invocation { program: tools.remux_bin.clone(), args, kind: ToolKind::Remux }
}

use sanitize_filename::{sanitize_with_options, Options};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const INTERMEDIATE_PREFIX: &str = "encrypted#";
const FINAL_EXTENSION: &str = "mkv";

/// Where tracks and finished files live under the storage root.
#[derive(Debug, Clone)]
pub struct MediaLayout {
    pub base: PathBuf,
    pub final_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub metadata_dir: PathBuf,
}

/// The two intermediate tracks produced by the fetch step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPaths {
    pub video: PathBuf,
    pub audio: PathBuf,
}

impl MediaLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            final_dir: base.join("final"),
            temp_dir: base.join("temp"),
            metadata_dir: base.join("metadata"),
            base,
        }
    }

    pub async fn ensure_dirs(&self) {
        for dir in [&self.base, &self.final_dir, &self.metadata_dir, &self.temp_dir] {
            match tokio::fs::create_dir_all(dir).await {
                Ok(()) => info!("directory ready: {}", dir.display()),
                Err(e) => warn!("failed to create directory {}: {e}", dir.display()),
            }
        }
    }

    pub fn final_path(&self, filename: &str) -> PathBuf {
        self.final_dir.join(format!("{filename}.{FINAL_EXTENSION}"))
    }

    /// Output template handed to the fetch tool; it fills in the extension.
    pub fn output_template(&self, filename: &str) -> String {
        format!("{INTERMEDIATE_PREFIX}{filename}.%(ext)s")
    }

    pub fn tracks(&self, filename: &str) -> TrackPaths {
        TrackPaths {
            video: self.temp_dir.join(format!("{INTERMEDIATE_PREFIX}{filename}.mp4")),
            audio: self.temp_dir.join(format!("{INTERMEDIATE_PREFIX}{filename}.m4a")),
        }
    }

    /// Removes intermediate tracks. Failures are logged and otherwise ignored.
    pub async fn cleanup(&self, tracks: &TrackPaths) {
        for path in [&tracks.video, &tracks.audio] {
            remove_quietly(path).await;
        }
    }
}

pub async fn artifact_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("deleted {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("file {} does not exist", path.display())
        }
        Err(e) => warn!("error deleting {}: {e}", path.display()),
    }
}

/// Makes a resolver-supplied title safe to use as a file name.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>') { '#' } else { c })
        .collect();
    sanitize_with_options(replaced, Options { replacement: "#", ..Options::default() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let l = MediaLayout::new("/data/videos");
        assert_eq!(l.final_path("Show S01E02"), PathBuf::from("/data/videos/final/Show S01E02.mkv"));
        assert_eq!(l.output_template("ep"), "encrypted#ep.%(ext)s");
        let t = l.tracks("ep");
        assert_eq!(t.video, PathBuf::from("/data/videos/temp/encrypted#ep.mp4"));
        assert_eq!(t.audio, PathBuf::from("/data/videos/temp/encrypted#ep.m4a"));
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_name("What? A/B: \"x\""), "What# A#B# #x#");
        assert_eq!(sanitize_name("  plain name "), "plain name");
    }

    #[tokio::test]
    async fn cleanup_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = MediaLayout::new(dir.path());
        layout.ensure_dirs().await;

        let tracks = layout.tracks("ep");
        tokio::fs::write(&tracks.video, b"v").await.unwrap();
        layout.cleanup(&tracks).await;

        assert!(!artifact_exists(&tracks.video).await);
        assert!(!artifact_exists(&tracks.audio).await);
    }
}

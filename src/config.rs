use crate::core::assembler::MediaLayout;
use crate::core::engine::EngineConfig;
use crate::core::planner::ToolSettings;
use crate::plugins::registry::{PluginRegistry, ResolverCliConfig};
use clap::{Arg, ArgAction, ArgMatches, Command};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Options shared by every subcommand.
pub fn common_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("video_path")
            .long("video-path")
            .env("VIDEO_PATH")
            .help("Storage root; final/, temp/ and metadata/ live below it")
            .default_value("./videos")
            .num_args(1),
    )
    .arg(
        Arg::new("profile")
            .long("profile")
            .env("NPO_PROFILE")
            .help("Viewer profile used when the account has several")
            .num_args(1),
    )
    .arg(
        Arg::new("fetch_bin")
            .long("fetch-bin")
            .env("FETCH_BIN")
            .help_heading("Tools")
            .help("Segment fetcher executable")
            .default_value("yt-dlp")
            .num_args(1),
    )
    .arg(
        Arg::new("remux_bin")
            .long("remux-bin")
            .env("REMUX_BIN")
            .help_heading("Tools")
            .help("Remuxer executable")
            .default_value("ffmpeg")
            .num_args(1),
    )
    .arg(
        Arg::new("external_downloader")
            .long("external-downloader")
            .env("EXTERNAL_DOWNLOADER")
            .help_heading("Tools")
            .help("Downloader the fetcher delegates to (empty disables)")
            .default_value("aria2c")
            .num_args(1),
    )
    .arg(
        Arg::new("strict_exit_codes")
            .long("strict-exit-codes")
            .env("STRICT_EXIT_CODES")
            .help_heading("Tools")
            .help("Fail a job when a tool exits non-zero")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("eviction_secs")
            .long("eviction-secs")
            .env("EVICTION_SECS")
            .help("Seconds a finished job stays queryable")
            .default_value("10")
            .num_args(1),
    )
}

/// Options only the server needs.
pub fn server_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("host")
            .long("host")
            .env("HOST")
            .help("Listen address")
            .default_value("0.0.0.0")
            .num_args(1),
    )
    .arg(
        Arg::new("port")
            .long("port")
            .env("PORT")
            .help("Listen port")
            .default_value("3001")
            .num_args(1),
    )
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub video_path: PathBuf,
    pub default_profile: Option<String>,
    pub tools: ToolSettings,
    pub strict_exit_codes: bool,
    pub eviction_delay: Duration,
    pub resolver: ResolverCliConfig,
}

impl Settings {
    pub fn from_matches(m: &ArgMatches, plugins: &PluginRegistry) -> anyhow::Result<Self> {
        let video_path: PathBuf = m.get_one::<String>("video_path").map(PathBuf::from).unwrap_or_else(|| "./videos".into());
        let default_profile = m.get_one::<String>("profile").map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let mut tools = ToolSettings::default();
        if let Some(bin) = m.get_one::<String>("fetch_bin") {
            tools.fetch_bin = bin.clone();
        }
        if let Some(bin) = m.get_one::<String>("remux_bin") {
            tools.remux_bin = bin.clone();
        }
        if let Some(dl) = m.get_one::<String>("external_downloader") {
            tools.external_downloader = Some(dl.trim().to_string()).filter(|s| !s.is_empty());
        }

        let eviction_secs: u64 = match m.get_one::<String>("eviction_secs") {
            Some(s) => s.parse()?,
            None => 10,
        };

        let mut resolver = ResolverCliConfig { base_url: Url::parse("http://127.0.0.1:3002/")?, timeout: None };
        plugins.apply_matches(m, &mut resolver)?;

        Ok(Self {
            video_path,
            default_profile,
            tools,
            strict_exit_codes: m.get_flag("strict_exit_codes"),
            eviction_delay: Duration::from_secs(eviction_secs),
            resolver,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            layout: MediaLayout::new(&self.video_path),
            tools: self.tools.clone(),
            strict_exit_codes: self.strict_exit_codes,
            eviction_delay: self.eviction_delay,
        }
    }
}

pub fn bind_addr(m: &ArgMatches) -> anyhow::Result<String> {
    let host = m.get_one::<String>("host").map(String::as_str).unwrap_or("0.0.0.0");
    let port: u16 = match m.get_one::<String>("port") {
        Some(p) => p.parse()?,
        None => 3001,
    };
    Ok(format!("{host}:{port}"))
}

/// The process-wide default profile. Starts from configuration and is
/// replaced whenever a client picks a profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    selected: Arc<RwLock<Option<String>>>,
}

impl ProfileStore {
    pub fn new(initial: Option<String>) -> Self {
        Self { selected: Arc::new(RwLock::new(initial)) }
    }

    pub fn get(&self) -> Option<String> {
        self.selected.read().clone()
    }

    pub fn set(&self, profile: impl Into<String>) {
        *self.selected.write() = Some(profile.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Settings {
        let plugins = PluginRegistry::with_defaults();
        let cmd = plugins.augment_command(common_args(Command::new("t")));
        let m = cmd.try_get_matches_from(args).unwrap();
        Settings::from_matches(&m, &plugins).unwrap()
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let s = parse(&[
            "t",
            "--video-path",
            "/srv/videos",
            "--profile",
            " Kids ",
            "--external-downloader",
            "",
            "--eviction-secs",
            "30",
            "--strict-exit-codes",
        ]);
        assert_eq!(s.video_path, PathBuf::from("/srv/videos"));
        assert_eq!(s.default_profile.as_deref(), Some("Kids"));
        assert_eq!(s.tools.external_downloader, None);
        assert_eq!(s.eviction_delay, Duration::from_secs(30));
        assert!(s.strict_exit_codes);
        assert_eq!(s.engine_config().layout.final_dir, PathBuf::from("/srv/videos/final"));
    }

    #[test]
    fn tool_overrides() {
        let s = parse(&["t", "--fetch-bin", "/opt/yt-dlp", "--remux-bin", "/opt/ffmpeg"]);
        assert_eq!(s.tools.fetch_bin, "/opt/yt-dlp");
        assert_eq!(s.tools.remux_bin, "/opt/ffmpeg");
        assert_eq!(s.tools.external_downloader.as_deref(), Some("aria2c"));
    }

    #[test]
    fn bind_address_from_flags() {
        let cmd = server_args(Command::new("t"));
        let m = cmd.try_get_matches_from(["t", "--host", "127.0.0.1", "--port", "8080"]).unwrap();
        assert_eq!(bind_addr(&m).unwrap(), "127.0.0.1:8080");
    }

    #[test]
    fn profile_store_replaces_selection() {
        let store = ProfileStore::new(None);
        assert_eq!(store.get(), None);
        store.set("Anna");
        let shared = store.clone();
        shared.set("Kids");
        assert_eq!(store.get().as_deref(), Some("Kids"));
    }
}

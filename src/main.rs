mod config;
mod core;
mod plugins;
mod server;
mod ui;

use clap::{Arg, ArgAction, Command};
use crate::config::{ProfileStore, Settings};
use crate::core::broadcaster::Broadcaster;
use crate::core::engine::{DownloadRequest, Engine};
use crate::core::model::JobStatus;
use crate::core::store::JobRegistry;
use crate::plugins::registry::PluginRegistry;
use crate::plugins::session::{AutomationSession, SessionPool};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn build_cli(registry: &PluginRegistry) -> Command {
    let serve = config::server_args(Command::new("serve").about("Run the HTTP + WebSocket server"));
    let serve = registry.augment_command(config::common_args(serve));

    let download = Command::new("download")
        .about("Download in the foreground with a progress bar")
        .arg(
            Arg::new("links")
                .help("Episode URLs; more than one runs them as a batch")
                .action(ArgAction::Append)
                .num_args(1..)
                .required(true),
        );
    let download = registry.augment_command(config::common_args(download));

    Command::new("media-fetch")
        .about("Resolve, fetch and remux protected episodes")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(serve)
        .subcommand(download)
}

/// `RUST_LOG` wins; otherwise `LOG_LEVEL` picks the level for this crate and
/// the HTTP layer. `NO_COLOR` turns off ANSI output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL")
            .map(|l| l.trim().to_ascii_lowercase())
            .ok()
            .filter(|l| matches!(l.as_str(), "error" | "warn" | "info" | "debug" | "trace"))
            .unwrap_or_else(|| "info".to_string());
        EnvFilter::new(format!("media_fetch={level},tower_http={level}"))
    });
    let ansi = std::env::var_os("NO_COLOR").map_or(true, |v| v.is_empty());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(ansi))
        .init();
}

async fn build_engine(registry: PluginRegistry, settings: &Settings) -> anyhow::Result<Engine> {
    let session = AutomationSession::new(settings.resolver.base_url.clone(), settings.resolver.timeout)?;
    tracing::info!("resolver endpoint: {}", settings.resolver.base_url);
    Ok(Engine::new(
        registry,
        SessionPool::new(session),
        JobRegistry::new(),
        Broadcaster::new(),
        settings.engine_config(),
    )
    .await)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let registry = PluginRegistry::with_defaults();
    let matches = build_cli(&registry).get_matches();

    match matches.subcommand() {
        Some(("serve", m)) => {
            let settings = Settings::from_matches(m, &registry)?;
            let addr = config::bind_addr(m)?;
            let profiles = ProfileStore::new(settings.default_profile.clone());
            let engine = build_engine(registry, &settings).await?;
            tracing::info!("video path: {}", settings.video_path.display());
            server::serve(server::AppState { engine, profiles }, &addr).await?;
        }
        Some(("download", m)) => {
            let settings = Settings::from_matches(m, &registry)?;
            let links: Vec<String> = m.get_many::<String>("links").into_iter().flatten().cloned().collect();
            let profile = settings.default_profile.clone();
            let engine = build_engine(registry, &settings).await?;

            let req = if links.len() == 1 {
                DownloadRequest::Episode { url: links[0].clone(), profile }
            } else {
                DownloadRequest::Batch { urls: links, profile }
            };

            let (observer, view) = ui::spawn_progress_view(engine.broadcaster());
            let (id, job) = engine.run_foreground(req).await;
            engine.broadcaster().unsubscribe(observer);
            let _ = view.await;

            match job.status {
                JobStatus::Completed => {
                    println!("Job {id} completed: {}", job.result.or(job.message).unwrap_or_default());
                }
                JobStatus::NeedsProfile => {
                    ui::print_profiles(job.profiles.as_deref().unwrap_or_default());
                    std::process::exit(2);
                }
                _ => {
                    eprintln!("Job {id} failed: {}", job.error.unwrap_or_else(|| "unknown error".to_string()));
                    std::process::exit(1);
                }
            }
        }
        _ => {}
    }

    Ok(())
}

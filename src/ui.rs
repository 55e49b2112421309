//! Terminal observer for foreground downloads.

use crate::core::broadcaster::{Broadcaster, ObserverId};
use crate::core::model::{JobStatus, ProfileCandidate, ProgressSample, Stage};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The fields of a pushed event the terminal cares about.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    download_id: Option<String>,
    #[serde(default)]
    progress: Option<ProgressSample>,
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    current_item: Option<usize>,
    #[serde(default)]
    total_items: Option<usize>,
}

fn stage_label(stage: Option<Stage>) -> &'static str {
    match stage {
        Some(Stage::FetchingInfo) => "fetching info",
        Some(Stage::Downloading) => "downloading",
        Some(Stage::Decrypting) => "decrypting",
        Some(Stage::Merging) => "merging",
        Some(Stage::Completed) => "completed",
        None => "working",
    }
}

/// Subscribes a progress bar to the broadcaster. The task ends once the
/// observer is unsubscribed.
pub fn spawn_progress_view(broadcaster: &Broadcaster) -> (ObserverId, JoinHandle<()>) {
    let (id, mut rx) = broadcaster.subscribe_channel();

    let handle = tokio::spawn(async move {
        let pb = ProgressBar::new(1000);
        let sty_bar = ProgressStyle::with_template("{prefix} {bar:40.cyan/blue} {percent:>3}% {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let sty_spin = ProgressStyle::with_template("{spinner:.green} {prefix} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("|/-\\ ");
        pb.set_style(sty_spin.clone());
        pb.enable_steady_tick(Duration::from_millis(120));

        while let Some(payload) = rx.recv().await {
            let Ok(ev) = serde_json::from_str::<WireEvent>(&payload) else {
                continue;
            };
            match ev.kind.as_str() {
                "download_progress" => {
                    let Some(p) = ev.progress else { continue };
                    match p.percentage {
                        Some(pct) => {
                            pb.set_style(sty_bar.clone());
                            pb.set_position((pct.clamp(0.0, 100.0) * 10.0) as u64);
                        }
                        None => pb.set_style(sty_spin.clone()),
                    }
                    let mut msg = stage_label(p.stage).to_string();
                    for extra in [&p.speed, &p.eta, &p.total_size, &p.time].into_iter().flatten() {
                        msg.push_str(" | ");
                        msg.push_str(extra);
                    }
                    pb.set_message(msg);
                }
                "download_status" => {
                    let id = ev.download_id.unwrap_or_default();
                    let status = ev.status.map(JobStatus::as_str).unwrap_or("?");
                    if let (Some(cur), Some(total)) = (ev.current_item, ev.total_items) {
                        pb.set_prefix(format!("[{cur}/{total}]"));
                    }
                    if let Some(name) = &ev.filename {
                        pb.set_prefix(format!("[{name}]"));
                        pb.set_position(0);
                    }
                    let line = match &ev.error {
                        Some(e) => format!("[JOB] {id} -> {status}: {e}"),
                        None => format!("[JOB] {id} -> {status}"),
                    };
                    pb.println(line);
                }
                _ => {}
            }
        }
        pb.finish_and_clear();
    });

    (id, handle)
}

pub fn print_profiles(profiles: &[ProfileCandidate]) {
    println!("Multiple profiles found; rerun with --profile <name>:");
    for p in profiles {
        match &p.index {
            Some(i) => println!("  [{i}] {}", p.name),
            None => println!("  {}", p.name),
        }
    }
}

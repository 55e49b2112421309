use crate::core::assembler::{artifact_exists, sanitize_name, MediaLayout};
use crate::core::broadcaster::Broadcaster;
use crate::core::events::{EngineEvent, StatusDetail};
use crate::core::model::*;
use crate::core::planner::{normalize_decryption_key, plan_fetch, plan_remux, ToolSettings};
use crate::core::runner::{Invocation, ProcessRunner};
use crate::core::store::JobRegistry;
use crate::core::telemetry::ProgressThrottle;
use crate::plugins::registry::{EpisodeInfo, MetadataResolver, PluginRegistry, Resolution};
use crate::plugins::session::SessionPool;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A request accepted from the outside, before it becomes a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadRequest {
    Episode { url: String, profile: Option<String> },
    Show { url: String, season_count: Option<u32>, reverse: bool, profile: Option<String> },
    Season { url: String, reverse: bool, profile: Option<String> },
    Batch { urls: Vec<String>, profile: Option<String> },
}

impl DownloadRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            DownloadRequest::Episode { .. } => RequestKind::Episode,
            DownloadRequest::Show { .. } => RequestKind::Show,
            DownloadRequest::Season { .. } => RequestKind::Season,
            DownloadRequest::Batch { .. } => RequestKind::Batch,
        }
    }

    fn initial_job(&self) -> Job {
        let job = Job::new(self.kind());
        match self {
            DownloadRequest::Episode { url, .. }
            | DownloadRequest::Show { url, .. }
            | DownloadRequest::Season { url, .. } => job.with_url(url.clone()),
            DownloadRequest::Batch { urls, .. } => job.with_total_items(urls.len()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub layout: MediaLayout,
    pub tools: ToolSettings,
    pub strict_exit_codes: bool,
    pub eviction_delay: Duration,
}

enum ItemOutcome {
    Done { filename: String, artifact: PathBuf },
    Paused,
}

/// Runs jobs through resolve, fetch, remux and cleanup, writing every state
/// change to the job registry and publishing it to observers.
#[derive(Clone)]
pub struct Engine {
    plugins: Arc<PluginRegistry>,
    sessions: SessionPool,
    jobs: JobRegistry,
    broadcaster: Broadcaster,
    runner: ProcessRunner,
    cfg: Arc<EngineConfig>,
}

impl Engine {
    pub async fn new(
        plugins: PluginRegistry,
        sessions: SessionPool,
        jobs: JobRegistry,
        broadcaster: Broadcaster,
        cfg: EngineConfig,
    ) -> Self {
        cfg.layout.ensure_dirs().await;
        Self {
            plugins: Arc::new(plugins),
            sessions,
            jobs,
            broadcaster,
            runner: ProcessRunner::new(cfg.strict_exit_codes),
            cfg: Arc::new(cfg),
        }
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn layout(&self) -> &MediaLayout {
        &self.cfg.layout
    }

    /// Registers the job and runs it in the background. The id is usable
    /// for status queries as soon as this returns.
    pub async fn add_and_start(&self, req: DownloadRequest) -> JobId {
        let id = self.register(&req).await;
        let engine = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            engine.run_job(job_id, req).await;
        });
        id
    }

    /// Runs the job on the caller's task and returns its final record.
    pub async fn run_foreground(&self, req: DownloadRequest) -> (JobId, Job) {
        let id = self.register(&req).await;
        let status = self.run_job(id.clone(), req.clone()).await;
        let job = match self.jobs.get(&id).await {
            Some(job) => job,
            None => {
                let mut job = req.initial_job();
                job.status = status;
                job
            }
        };
        (id, job)
    }

    async fn register(&self, req: &DownloadRequest) -> JobId {
        let id = self.jobs.next_id();
        self.jobs.create(&id, req.initial_job()).await;
        info!(job = %id, kind = ?req.kind(), "job accepted");
        id
    }

    async fn run_job(&self, id: JobId, req: DownloadRequest) -> JobStatus {
        let outcome = match req {
            DownloadRequest::Episode { url, profile } => self.run_episode(&id, &url, profile.as_deref()).await,
            DownloadRequest::Show { url, season_count, reverse, profile } => {
                match self.list_items(&id, &url, Some(season_count), reverse).await {
                    Ok(urls) => self.run_items(&id, &urls, profile.as_deref()).await,
                    Err(e) => Err(e),
                }
            }
            DownloadRequest::Season { url, reverse, profile } => match self.list_items(&id, &url, None, reverse).await {
                Ok(urls) => self.run_items(&id, &urls, profile.as_deref()).await,
                Err(e) => Err(e),
            },
            DownloadRequest::Batch { urls, profile } => self.run_items(&id, &urls, profile.as_deref()).await,
        };

        let status = match outcome {
            Ok(status) => status,
            Err(e) => {
                let message = format!("{e:#}");
                error!(job = %id, "download failed: {message}");
                self.transition(
                    &id,
                    JobStatus::Error,
                    JobPatch { error: Some(message.clone()), ..Default::default() },
                    StatusDetail { error: Some(message), ..Default::default() },
                )
                .await;
                JobStatus::Error
            }
        };

        if status.is_terminal() {
            self.jobs.schedule_eviction(&id, self.cfg.eviction_delay);
        }
        status
    }

    async fn run_episode(&self, id: &str, url: &str, profile: Option<&str>) -> anyhow::Result<JobStatus> {
        match self.process_item(id, url, profile).await? {
            ItemOutcome::Paused => Ok(JobStatus::NeedsProfile),
            ItemOutcome::Done { filename, artifact } => {
                let result = artifact.display().to_string();
                info!(job = %id, "download completed: {result}");
                self.transition(
                    id,
                    JobStatus::Completed,
                    JobPatch { result: Some(result.clone()), ..Default::default() },
                    StatusDetail { filename: Some(filename), result: Some(result), ..Default::default() },
                )
                .await;
                Ok(JobStatus::Completed)
            }
        }
    }

    /// `season_count` is `Some` for shows (where `Some(None)` walks every
    /// season) and `None` for a single season.
    async fn list_items(
        &self,
        id: &str,
        url: &str,
        season_count: Option<Option<u32>>,
        reverse: bool,
    ) -> anyhow::Result<Vec<String>> {
        self.transition(
            id,
            JobStatus::FetchingInfo,
            JobPatch::default(),
            StatusDetail { url: Some(url.to_string()), ..Default::default() },
        )
        .await;

        let resolver = self.resolver_for(url)?;
        let mut lease = self.sessions.checkout().await;
        let urls = match season_count {
            Some(count) => resolver.list_show(&mut lease, url, count, reverse).await,
            None => resolver.list_season(&mut lease, url, reverse).await,
        }
        .with_context(|| format!("failed to list episodes for {url}"))?;

        info!(job = %id, "found {} episodes", urls.len());
        Ok(urls)
    }

    async fn run_items(&self, id: &str, urls: &[String], profile: Option<&str>) -> anyhow::Result<JobStatus> {
        let total = urls.len();
        for (i, url) in urls.iter().enumerate() {
            let position = i + 1;
            info!(job = %id, "episode {position}/{total}: {url}");
            self.transition(
                id,
                JobStatus::Downloading,
                JobPatch {
                    total_items: Some(total),
                    current_item: Some(position),
                    current_file: Some(url.clone()),
                    ..Default::default()
                },
                StatusDetail {
                    url: Some(url.clone()),
                    current_item: Some(position),
                    total_items: Some(total),
                    ..Default::default()
                },
            )
            .await;

            if let ItemOutcome::Paused = self.process_item(id, url, profile).await? {
                return Ok(JobStatus::NeedsProfile);
            }
        }

        let message = format!("{total} episodes downloaded");
        self.transition(
            id,
            JobStatus::Completed,
            JobPatch { total_items: Some(total), message: Some(message.clone()), ..Default::default() },
            StatusDetail { total_items: Some(total), message: Some(message), ..Default::default() },
        )
        .await;
        Ok(JobStatus::Completed)
    }

    async fn process_item(&self, id: &str, url: &str, profile: Option<&str>) -> anyhow::Result<ItemOutcome> {
        self.transition(
            id,
            JobStatus::FetchingInfo,
            JobPatch::default(),
            StatusDetail { url: Some(url.to_string()), ..Default::default() },
        )
        .await;

        let info = match self.resolve(url, profile).await {
            Resolution::Ready(info) => info,
            Resolution::NeedsDecision(prompt) => {
                info!(job = %id, "profile selection required ({} profiles)", prompt.profiles.len());
                self.transition(
                    id,
                    JobStatus::NeedsProfile,
                    JobPatch {
                        url: Some(url.to_string()),
                        profiles: Some(prompt.profiles.clone()),
                        message: Some(prompt.message.clone()),
                        ..Default::default()
                    },
                    StatusDetail {
                        url: Some(url.to_string()),
                        profiles: Some(prompt.profiles),
                        message: Some(prompt.message),
                        ..Default::default()
                    },
                )
                .await;
                return Ok(ItemOutcome::Paused);
            }
            Resolution::Failed(reason) => anyhow::bail!(reason),
        };

        let filename = sanitize_name(&info.filename);
        if filename.is_empty() {
            anyhow::bail!("resolver returned an unusable filename: {:?}", info.filename);
        }

        self.transition(
            id,
            JobStatus::Downloading,
            JobPatch { filename: Some(filename.clone()), ..Default::default() },
            StatusDetail { filename: Some(filename.clone()), ..Default::default() },
        )
        .await;

        let artifact = self.acquire(id, &info, &filename).await?;
        Ok(ItemOutcome::Done { filename, artifact })
    }

    async fn resolve(&self, url: &str, profile: Option<&str>) -> Resolution {
        let resolver = match self.resolver_for(url) {
            Ok(r) => r,
            Err(e) => return Resolution::Failed(e.to_string()),
        };
        let mut lease = self.sessions.checkout().await;
        debug!(resolver = resolver.name(), profile = ?profile, "resolving {url}");
        resolver.resolve(&mut lease, url, profile).await
    }

    fn resolver_for(&self, url: &str) -> anyhow::Result<&dyn MetadataResolver> {
        self.plugins
            .best_resolver(url)
            .ok_or_else(|| anyhow::anyhow!("no resolver for input: {url}"))
    }

    /// Produces the final artifact, or reuses it when it already exists.
    async fn acquire(&self, id: &str, info: &EpisodeInfo, filename: &str) -> anyhow::Result<PathBuf> {
        let layout = &self.cfg.layout;
        let artifact = layout.final_path(filename);

        if artifact_exists(&artifact).await {
            info!(job = %id, "already downloaded: {}", artifact.display());
            self.emit(id, ProgressSample::anchored(100.0, Stage::Completed, "File already exists")).await;
            return Ok(artifact);
        }

        self.emit(id, ProgressSample::anchored(0.0, Stage::Downloading, "Starting video download...")).await;
        let fetch = plan_fetch(&self.cfg.tools, layout, filename, &info.track_location_url);
        self.run_tool(id, &fetch, Some(Stage::Downloading)).await?;

        let key = normalize_decryption_key(info.decryption_token.as_deref());
        let anchor = match key {
            Some(_) => ProgressSample::anchored(50.0, Stage::Decrypting, "Decrypting video..."),
            None => ProgressSample::anchored(50.0, Stage::Merging, "Merging audio and video..."),
        };
        self.emit(id, anchor).await;

        let tracks = layout.tracks(filename);
        let remux = plan_remux(&self.cfg.tools, &tracks, &artifact, key.as_deref());
        self.emit(id, ProgressSample::anchored(75.0, Stage::Merging, "Merging audio and video tracks...")).await;
        self.run_tool(id, &remux, None).await?;

        if artifact_exists(&artifact).await {
            layout.cleanup(&tracks).await;
        } else {
            warn!(job = %id, "{} finished but {} is missing; keeping tracks", remux.program, artifact.display());
        }

        self.emit(id, ProgressSample::anchored(100.0, Stage::Completed, "Download completed successfully")).await;
        Ok(artifact)
    }

    /// Runs one tool while a drain loop on the same task forwards its
    /// samples. When `stage` is set it overrides whatever the parser chose.
    async fn run_tool(&self, id: &str, inv: &Invocation, stage: Option<Stage>) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = &self.runner;

        let run = async move {
            let r = runner.run(inv, (), Some(&tx)).await;
            drop(tx);
            r
        };

        let drain = async {
            let mut throttle = ProgressThrottle::default();
            while let Some(mut sample) = rx.recv().await {
                if stage.is_some() {
                    sample.stage = stage;
                }
                if let Some(pct) = sample.percentage {
                    if throttle.should_surface(pct) {
                        info!(
                            job = %id,
                            tool = %inv.program,
                            "{pct:.1}% speed={} eta={}",
                            sample.speed.as_deref().unwrap_or("-"),
                            sample.eta.as_deref().unwrap_or("-"),
                        );
                    }
                }
                self.emit(id, sample).await;
            }
        };

        let (result, ()) = tokio::join!(run, drain);
        result?;
        Ok(())
    }

    async fn emit(&self, id: &str, sample: ProgressSample) {
        self.jobs.set(id, JobPatch::progress(sample.clone())).await;
        self.broadcaster.publish(&EngineEvent::progress(id, sample));
    }

    async fn transition(&self, id: &str, status: JobStatus, mut patch: JobPatch, detail: StatusDetail) {
        patch.status = Some(status);
        self.jobs.set(id, patch).await;
        debug!(job = %id, status = status.as_str(), "status changed");
        self.broadcaster.publish(&EngineEvent::status(id, status, detail));
    }
}

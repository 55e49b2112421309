use serde::{Deserialize, Serialize};

/// Opaque job identifier, unique for the lifetime of the process.
pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    FetchingInfo,
    NeedsProfile,
    Downloading,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::FetchingInfo => "fetching_info",
            JobStatus::NeedsProfile => "needs_profile",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Episode,
    Show,
    Season,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchingInfo,
    Downloading,
    Decrypting,
    Merging,
    Completed,
}

/// One structured progress fragment. Every field is optional because each
/// tool only reports a subset of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressSample {
    /// A fixed milestone emitted by the engine between tool invocations.
    pub fn anchored(percentage: f64, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            percentage: Some(percentage),
            stage: Some(stage),
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCandidate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub status: JobStatus,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<ProfileCandidate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Job {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            status: JobStatus::Processing,
            kind,
            url: None,
            filename: None,
            total_items: None,
            current_item: None,
            current_file: None,
            progress: None,
            result: None,
            error: None,
            profiles: None,
            message: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_total_items(mut self, total: usize) -> Self {
        self.total_items = Some(total);
        self
    }

    /// Shallow merge: every field set in the patch replaces the current one.
    pub fn apply(&mut self, patch: JobPatch) {
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.url {
            self.url = Some(v);
        }
        if let Some(v) = patch.filename {
            self.filename = Some(v);
        }
        if let Some(v) = patch.total_items {
            self.total_items = Some(v);
        }
        if let Some(v) = patch.current_item {
            self.current_item = Some(v);
        }
        if let Some(v) = patch.current_file {
            self.current_file = Some(v);
        }
        if let Some(v) = patch.progress {
            self.progress = Some(v);
        }
        if let Some(v) = patch.result {
            self.result = Some(v);
        }
        if let Some(v) = patch.error {
            self.error = Some(v);
        }
        if let Some(v) = patch.profiles {
            self.profiles = Some(v);
        }
        if let Some(v) = patch.message {
            self.message = Some(v);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub total_items: Option<usize>,
    pub current_item: Option<usize>,
    pub current_file: Option<String>,
    pub progress: Option<ProgressSample>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub profiles: Option<Vec<ProfileCandidate>>,
    pub message: Option<String>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    pub fn progress(sample: ProgressSample) -> Self {
        Self { progress: Some(sample), ..Default::default() }
    }

    /// Builds a patch from a fresh record, used when `set` inserts an id the
    /// registry has not seen.
    pub(crate) fn into_job(self, kind: RequestKind) -> Job {
        let mut job = Job::new(kind);
        job.apply(self);
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_only_overrides_present_fields() {
        let mut job = Job::new(RequestKind::Episode).with_url("https://example.test/a");
        job.apply(JobPatch { status: Some(JobStatus::Downloading), filename: Some("ep".into()), ..Default::default() });
        job.apply(JobPatch::progress(ProgressSample::anchored(50.0, Stage::Merging, "m")));

        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.url.as_deref(), Some("https://example.test/a"));
        assert_eq!(job.filename.as_deref(), Some("ep"));
        assert_eq!(job.progress.as_ref().and_then(|p| p.percentage), Some(50.0));
    }

    #[test]
    fn job_serializes_with_wire_names() {
        let mut job = Job::new(RequestKind::Batch).with_total_items(3);
        job.apply(JobPatch { current_item: Some(1), status: Some(JobStatus::NeedsProfile), ..Default::default() });
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["status"], "needs_profile");
        assert_eq!(v["type"], "batch");
        assert_eq!(v["totalItems"], 3);
        assert_eq!(v["currentItem"], 1);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn only_completed_and_error_are_terminal() {
        let all = [
            JobStatus::Processing,
            JobStatus::FetchingInfo,
            JobStatus::NeedsProfile,
            JobStatus::Downloading,
            JobStatus::Completed,
            JobStatus::Error,
        ];
        let terminal: Vec<_> = all.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![JobStatus::Completed, JobStatus::Error]);
    }
}

use crate::core::model::{JobId, JobStatus, ProfileCandidate, ProgressSample};
use serde::Serialize;

/// Everything the broadcaster pushes to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Connected {
        message: String,
    },
    DownloadProgress {
        #[serde(rename = "downloadId")]
        download_id: JobId,
        progress: ProgressSample,
    },
    DownloadStatus {
        #[serde(rename = "downloadId")]
        download_id: JobId,
        status: JobStatus,
        #[serde(flatten)]
        detail: StatusDetail,
    },
}

impl EngineEvent {
    pub fn progress(download_id: &str, progress: ProgressSample) -> Self {
        EngineEvent::DownloadProgress { download_id: download_id.to_string(), progress }
    }

    pub fn status(download_id: &str, status: JobStatus, detail: StatusDetail) -> Self {
        EngineEvent::DownloadStatus { download_id: download_id.to_string(), status, detail }
    }
}

/// Extra fields flattened into a `download_status` event.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<ProfileCandidate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<usize>,
}

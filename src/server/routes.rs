use crate::core::engine::DownloadRequest;
use crate::core::library;
use crate::core::model::JobStatus;
use crate::server::error::{ok, ApiError, ApiResult};
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct EpisodeBody {
    url: Option<String>,
    profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowBody {
    url: Option<String>,
    #[serde(alias = "seasons")]
    season_count: Option<i64>,
    reverse: Option<bool>,
    profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SeasonBody {
    url: Option<String>,
    reverse: Option<bool>,
    profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchBody {
    urls: Option<Vec<String>>,
    profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectProfileBody {
    profile: Option<String>,
    url: Option<String>,
    download_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    id: Option<String>,
}

/// An empty body counts as `{}`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) { b"{}" } else { body.as_ref() };
    serde_json::from_slice(raw).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))
}

fn required_url(url: Option<String>) -> ApiResult<String> {
    url.map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("URL is required".to_string()))
}

fn profile_or_default(state: &AppState, profile: Option<String>) -> Option<String> {
    profile.filter(|p| !p.trim().is_empty()).or_else(|| state.profiles.get())
}

async fn start(state: &AppState, req: DownloadRequest) -> ApiResult<Json<Value>> {
    let id = state.engine.add_and_start(req).await;
    ok(json!({ "downloadId": id, "message": "Download started" }))
}

pub async fn download_episode(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body: EpisodeBody = parse_body(&body)?;
    let url = required_url(body.url)?;
    let profile = profile_or_default(&state, body.profile);
    start(&state, DownloadRequest::Episode { url, profile }).await
}

pub async fn download_show(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body: ShowBody = parse_body(&body)?;
    let url = required_url(body.url)?;
    // -1, zero or absent all mean every season.
    let season_count = body.season_count.filter(|n| *n > 0).map(|n| n.min(u32::MAX as i64) as u32);
    let profile = profile_or_default(&state, body.profile);
    start(&state, DownloadRequest::Show { url, season_count, reverse: body.reverse.unwrap_or(false), profile }).await
}

pub async fn download_season(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body: SeasonBody = parse_body(&body)?;
    let url = required_url(body.url)?;
    let profile = profile_or_default(&state, body.profile);
    start(&state, DownloadRequest::Season { url, reverse: body.reverse.unwrap_or(false), profile }).await
}

pub async fn download_batch(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body: BatchBody = parse_body(&body)?;
    let urls: Vec<String> = body
        .urls
        .unwrap_or_default()
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.is_empty() {
        return Err(ApiError::BadRequest("URLs array is required".to_string()));
    }
    let profile = profile_or_default(&state, body.profile);
    start(&state, DownloadRequest::Batch { urls, profile }).await
}

pub async fn status(State(state): State<AppState>, Query(q): Query<StatusQuery>) -> ApiResult<Json<Value>> {
    match q.id.filter(|id| !id.trim().is_empty()) {
        Some(id) => match state.engine.jobs().get(&id).await {
            Some(job) => ok(job),
            None => Err(ApiError::NotFound("Download not found".to_string())),
        },
        None => ok(state.engine.jobs().list().await),
    }
}

pub async fn list_downloads(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let files = library::list_downloads(state.engine.layout())
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read library: {e}")))?;
    ok(json!({ "files": files }))
}

pub async fn list_shows(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let shows = library::shows_hierarchy(state.engine.layout())
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read library: {e}")))?;
    ok(json!({ "shows": shows }))
}

pub async fn get_profiles(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    ok(json!({ "selectedProfile": state.profiles.get() }))
}

/// Stores the choice as the new default and, when the paused download is
/// known, starts it again as a fresh job.
pub async fn select_profile(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body: SelectProfileBody = parse_body(&body)?;
    let profile = body
        .profile
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Profile name is required".to_string()))?;

    let mut url = body.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
    if url.is_none() {
        if let Some(id) = body.download_id.as_deref().filter(|id| !id.trim().is_empty()) {
            let job = state
                .engine
                .jobs()
                .get(id)
                .await
                .ok_or_else(|| ApiError::NotFound("Download not found".to_string()))?;
            if job.status == JobStatus::NeedsProfile {
                url = job.url;
            }
        }
    }

    state.profiles.set(profile.clone());
    info!("profile selected: {profile}");

    match url {
        Some(url) => {
            let id = state.engine.add_and_start(DownloadRequest::Episode { url, profile: Some(profile.clone()) }).await;
            ok(json!({ "message": "Profile selected, download restarted", "profile": profile, "downloadId": id }))
        }
        None => ok(json!({ "message": "Profile selected", "profile": profile })),
    }
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    ok(json!({
        "status": "ok",
        "observers": state.engine.broadcaster().observer_count(),
        "jobs": state.engine.jobs().len().await,
    }))
}

pub async fn not_found(uri: Uri) -> Response {
    if uri.path().starts_with("/api") {
        ApiError::NotFound("Endpoint not found".to_string()).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

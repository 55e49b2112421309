//! HTTP + WebSocket surface over the engine.

pub mod error;
pub mod routes;
pub mod ws;

use crate::config::ProfileStore;
use crate::core::engine::Engine;
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub profiles: ProfileStore,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Downloads
        .route("/api/download/episode", post(routes::download_episode))
        .route("/api/download/show", post(routes::download_show))
        .route("/api/download/season", post(routes::download_season))
        .route("/api/download/batch", post(routes::download_batch))
        .route("/api/status", get(routes::status))
        // Library
        .route("/api/downloads", get(routes::list_downloads))
        .route("/api/shows", get(routes::list_shows))
        // Profiles
        .route("/api/profiles", get(routes::get_profiles))
        .route("/api/profiles/select", post(routes::select_profile))
        .route("/api/health", get(routes::health))
        // Push channel
        .route("/ws", get(ws::upgrade))
        .fallback(routes::not_found)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);
    tracing::info!("WebSocket endpoint: ws://{}/ws", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assembler::MediaLayout;
    use crate::core::broadcaster::Broadcaster;
    use crate::core::engine::EngineConfig;
    use crate::core::planner::ToolSettings;
    use crate::core::store::JobRegistry;
    use crate::plugins::fake::{prompt, session_pool, FakeResolver};
    use crate::plugins::registry::PluginRegistry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    const EP: &str = "https://www.example.test/afspelen/ep-1";

    async fn state(dir: &std::path::Path) -> AppState {
        let resolver = FakeResolver::default().with_episode(EP, prompt());
        let engine = Engine::new(
            PluginRegistry::empty().with_resolver(resolver),
            session_pool(),
            JobRegistry::new(),
            Broadcaster::new(),
            EngineConfig {
                layout: MediaLayout::new(dir),
                tools: ToolSettings::default(),
                strict_exit_codes: false,
                eviction_delay: Duration::from_secs(600),
            },
        )
        .await;
        AppState { engine, profiles: ProfileStore::new(None) }
    }

    async fn call(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn wait_for_status(state: &AppState, id: &str, want: &str) {
        for _ in 0..200 {
            if let Some(job) = state.engine.jobs().get(id).await {
                if job.status.as_str() == want {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never reached {want}");
    }

    #[tokio::test]
    async fn missing_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state(dir.path()).await);

        let (status, body) = call(app.clone(), "POST", "/api/download/episode", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({ "success": false, "error": "URL is required" }));

        let (status, body) = call(app, "POST", "/api/download/batch", r#"{"urls":[]}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "URLs array is required");
    }

    #[tokio::test]
    async fn empty_body_counts_as_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state(dir.path()).await);
        let (status, body) = call(app, "POST", "/api/download/season", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "URL is required");
    }

    #[tokio::test]
    async fn unknown_download_and_endpoint_are_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state(dir.path()).await);

        let (status, body) = call(app.clone(), "GET", "/api/status?id=nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Download not found");

        let (status, body) = call(app, "GET", "/api/nothing/here", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Endpoint not found");
    }

    #[tokio::test]
    async fn episode_start_is_visible_in_status() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path()).await;
        let app = create_router(st.clone());

        let (status, body) = call(app.clone(), "POST", "/api/download/episode", &format!(r#"{{"url":"{EP}"}}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let id = body["data"]["downloadId"].as_str().unwrap().to_string();

        let (status, body) = call(app.clone(), "GET", &format!("/api/status?id={id}"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["type"], "episode");

        wait_for_status(&st, &id, "needs_profile").await;
        let (_, all) = call(app, "GET", "/api/status", "").await;
        assert_eq!(all["data"][id.as_str()]["status"], "needs_profile");
        assert_eq!(all["data"][id.as_str()]["profiles"][0]["name"], "Anna");
    }

    #[tokio::test]
    async fn selecting_a_profile_restarts_under_a_new_id() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path()).await;
        let app = create_router(st.clone());

        let (_, body) = call(app.clone(), "POST", "/api/download/episode", &format!(r#"{{"url":"{EP}"}}"#)).await;
        let first = body["data"]["downloadId"].as_str().unwrap().to_string();
        wait_for_status(&st, &first, "needs_profile").await;

        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/profiles/select",
            &format!(r#"{{"profile":"Kids","downloadId":"{first}"}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let second = body["data"]["downloadId"].as_str().unwrap().to_string();
        assert_ne!(first, second);

        let (_, body) = call(app, "GET", "/api/profiles", "").await;
        assert_eq!(body["data"]["selectedProfile"], "Kids");
    }

    #[tokio::test]
    async fn profile_name_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state(dir.path()).await);
        let (status, body) = call(app, "POST", "/api/profiles/select", r#"{"profile":"  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Profile name is required");
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path()).await;
        let (_, _rx) = st.engine.broadcaster().subscribe_channel();
        let (status, body) = call(create_router(st), "GET", "/api/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["observers"], 1);
        assert_eq!(body["data"]["jobs"], 0);
    }

    #[tokio::test]
    async fn empty_status_id_lists_everything() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path()).await;
        let app = create_router(st.clone());
        let (_, body) = call(app.clone(), "POST", "/api/download/episode", &format!(r#"{{"url":"{EP}"}}"#)).await;
        let id = body["data"]["downloadId"].as_str().unwrap().to_string();

        let (status, body) = call(app, "GET", "/api/status?id=", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"][id.as_str()].is_object());
    }

    #[tokio::test]
    async fn unknown_download_id_leaves_default_profile_alone() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path()).await;
        st.profiles.set("Anna");
        let app = create_router(st.clone());

        let (status, body) =
            call(app.clone(), "POST", "/api/profiles/select", r#"{"profile":"Kids","downloadId":"404"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Download not found");
        assert_eq!(st.profiles.get().as_deref(), Some("Anna"));
    }

    #[tokio::test]
    async fn library_lists_finished_files() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path()).await;
        std::fs::write(dir.path().join("final/Show S01E02 - Second.mkv"), b"22").unwrap();
        std::fs::write(dir.path().join("final/partial.part"), b"x").unwrap();
        std::fs::write(
            dir.path().join("metadata/Show S01E02 - Second.json"),
            r#"{"seriesTitle":"Show","title":"Second","seasonNumber":1,"episodeNumber":2}"#,
        )
        .unwrap();
        let app = create_router(st);

        let (status, body) = call(app.clone(), "GET", "/api/downloads", "").await;
        assert_eq!(status, StatusCode::OK);
        let files = body["data"]["files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["name"], "Show S01E02 - Second.mkv");
        assert_eq!(files[0]["size"], 2);
        assert_eq!(files[0]["metadata"]["seriesTitle"], "Show");
        assert_eq!(files[0]["metadata"]["episodeNumber"], 2);

        let (status, body) = call(app, "GET", "/api/shows", "").await;
        assert_eq!(status, StatusCode::OK);
        let show = &body["data"]["shows"][0];
        assert_eq!(show["title"], "Show");
        assert_eq!(show["seasons"][0]["number"], 1);
        assert_eq!(show["seasons"][0]["episodes"][0]["title"], "Second");
        assert_eq!(show["seasons"][0]["episodes"][0]["fullMetadata"]["title"], "Second");
    }
}

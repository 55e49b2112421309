//! Scripted resolver used by engine and server tests.

use crate::core::model::ProfileCandidate;
use crate::plugins::registry::{EpisodeInfo, MetadataResolver, ProfilePrompt, Resolution};
use crate::plugins::session::{AutomationSession, SessionLease, SessionPool};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

#[derive(Clone, Default)]
pub struct FakeResolver {
    episodes: HashMap<String, Resolution>,
    listing: Option<Vec<String>>,
    pub calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl FakeResolver {
    pub fn with_episode(mut self, url: &str, resolution: Resolution) -> Self {
        self.episodes.insert(url.to_string(), resolution);
        self
    }

    pub fn with_listing(mut self, urls: &[&str]) -> Self {
        self.listing = Some(urls.iter().map(|u| u.to_string()).collect());
        self
    }

    pub fn resolved_urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(u, _)| u.clone()).collect()
    }
}

pub fn ready(filename: &str, token: Option<&str>) -> Resolution {
    Resolution::Ready(EpisodeInfo {
        filename: filename.to_string(),
        track_location_url: format!("https://cdn.example.test/{filename}.mpd"),
        decryption_token: token.map(str::to_string),
    })
}

pub fn prompt() -> Resolution {
    Resolution::NeedsDecision(ProfilePrompt {
        profiles: vec![
            ProfileCandidate { name: "Anna".into(), index: Some("0".into()), test_id: Some("profile-0".into()) },
            ProfileCandidate { name: "Kids".into(), index: Some("1".into()), test_id: Some("profile-1".into()) },
        ],
        message: "Please select a profile".into(),
    })
}

pub fn session_pool() -> SessionPool {
    let base = Url::parse("http://127.0.0.1:9/").expect("static url");
    SessionPool::new(AutomationSession::new(base, None).expect("client"))
}

#[async_trait]
impl MetadataResolver for FakeResolver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn can_handle(&self, url: &str) -> u8 {
        if url.starts_with("http://") || url.starts_with("https://") {
            10
        } else {
            0
        }
    }

    async fn resolve(&self, session: &mut SessionLease, url: &str, profile: Option<&str>) -> Resolution {
        session.record_use();
        self.calls.lock().push((url.to_string(), profile.map(str::to_string)));
        self.episodes
            .get(url)
            .cloned()
            .unwrap_or_else(|| Resolution::Failed("Failed to get episode information".into()))
    }

    async fn list_show(
        &self,
        session: &mut SessionLease,
        url: &str,
        _season_count: Option<u32>,
        reverse: bool,
    ) -> anyhow::Result<Vec<String>> {
        self.list_season(session, url, reverse).await
    }

    async fn list_season(&self, _session: &mut SessionLease, url: &str, reverse: bool) -> anyhow::Result<Vec<String>> {
        let mut urls = self.listing.clone().ok_or_else(|| anyhow::anyhow!("no episodes found at {url}"))?;
        if reverse {
            urls.reverse();
        }
        Ok(urls)
    }
}

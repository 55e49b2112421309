use crate::core::model::ProfileCandidate;
use crate::plugins::registry::{EpisodeInfo, MetadataResolver, ProfilePrompt, Resolution};
use crate::plugins::session::SessionLease;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

const NO_INFO: &str = "Failed to get episode information";
const DEFAULT_PROMPT: &str = "Multiple profiles found. Please select one.";

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("invalid resolver endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("resolver request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("resolver answered {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },
    #[error("unexpected resolver payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Talks to the browser-automation sidecar over JSON/HTTP.
///
/// `POST resolve {url, profile}` answers with episode info, a profile
/// prompt, or `null`. `POST show` and `POST season` answer with arrays of
/// episode URLs.
pub struct HttpMetadataResolver;

impl HttpMetadataResolver {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResolution {
    Prompt {
        #[serde(rename = "needsProfileSelection")]
        needs_profile_selection: bool,
        #[serde(default)]
        profiles: Vec<ProfileCandidate>,
        #[serde(default)]
        message: Option<String>,
    },
    Info(EpisodeInfo),
}

fn into_resolution(wire: Option<WireResolution>) -> Resolution {
    match wire {
        Some(WireResolution::Prompt { needs_profile_selection: true, profiles, message }) => {
            Resolution::NeedsDecision(ProfilePrompt {
                profiles,
                message: message.unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            })
        }
        Some(WireResolution::Info(info)) if !info.filename.trim().is_empty() && !info.track_location_url.is_empty() => {
            Resolution::Ready(info)
        }
        _ => Resolution::Failed(NO_INFO.to_string()),
    }
}

async fn post_json<T: DeserializeOwned>(
    session: &mut SessionLease,
    path: &str,
    body: serde_json::Value,
) -> Result<T, ResolveError> {
    session.record_use();
    let endpoint: Url = session.endpoint(path)?;
    debug!(%endpoint, "resolver call");

    let resp = session.client().post(endpoint).json(&body).send().await?;
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(ResolveError::Status { status, body: text });
    }
    Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl MetadataResolver for HttpMetadataResolver {
    fn name(&self) -> &'static str {
        "http-sidecar"
    }

    fn can_handle(&self, url: &str) -> u8 {
        match Url::parse(url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => 60,
            _ => 0,
        }
    }

    async fn resolve(&self, session: &mut SessionLease, url: &str, profile: Option<&str>) -> Resolution {
        let body = json!({ "url": url, "profile": profile });
        match post_json::<Option<WireResolution>>(session, "resolve", body).await {
            Ok(wire) => into_resolution(wire),
            Err(e) => {
                warn!("resolver failed for {url}: {e}");
                Resolution::Failed(e.to_string())
            }
        }
    }

    async fn list_show(
        &self,
        session: &mut SessionLease,
        url: &str,
        season_count: Option<u32>,
        reverse: bool,
    ) -> anyhow::Result<Vec<String>> {
        let body = json!({ "url": url, "seasonCount": season_count, "reverse": reverse });
        Ok(post_json(session, "show", body).await?)
    }

    async fn list_season(&self, session: &mut SessionLease, url: &str, reverse: bool) -> anyhow::Result<Vec<String>> {
        let body = json!({ "url": url, "reverse": reverse });
        Ok(post_json(session, "season", body).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Resolution {
        into_resolution(serde_json::from_str(raw).unwrap())
    }

    #[test]
    fn profile_prompt_payload() {
        let r = decode(r#"{"needsProfileSelection":true,"profiles":[{"name":"Anna","index":"0","testId":"p0"}]}"#);
        let Resolution::NeedsDecision(prompt) = r else { panic!("expected prompt, got {r:?}") };
        assert_eq!(prompt.profiles[0].name, "Anna");
        assert_eq!(prompt.profiles[0].test_id.as_deref(), Some("p0"));
        assert_eq!(prompt.message, DEFAULT_PROMPT);
    }

    #[test]
    fn episode_payload() {
        let r = decode(r#"{"filename":"Show S1E1","mpdUrl":"https://cdn/x.mpd","wideVineKeyResponse":"a:b"}"#);
        let Resolution::Ready(info) = r else { panic!("expected info, got {r:?}") };
        assert_eq!(info.track_location_url, "https://cdn/x.mpd");
        assert_eq!(info.decryption_token.as_deref(), Some("a:b"));
    }

    #[test]
    fn null_or_incomplete_payload_fails() {
        assert_eq!(decode("null"), Resolution::Failed(NO_INFO.into()));
        assert_eq!(decode(r#"{"filename":"","trackLocationUrl":"u"}"#), Resolution::Failed(NO_INFO.into()));
        assert_eq!(decode(r#"{"needsProfileSelection":false}"#), Resolution::Failed(NO_INFO.into()));
    }

    #[test]
    fn only_web_urls_are_handled() {
        let r = HttpMetadataResolver::new();
        assert_eq!(r.can_handle("https://www.example.test/afspelen/x"), 60);
        assert_eq!(r.can_handle("ftp://host/file"), 0);
        assert_eq!(r.can_handle("not a url"), 0);
    }
}

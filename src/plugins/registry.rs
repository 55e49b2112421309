use crate::core::model::ProfileCandidate;
use crate::plugins::session::SessionLease;
use anyhow::Context;
use async_trait::async_trait;
use clap::{ArgMatches, Command};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// What the resolver learned about one episode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeInfo {
    pub filename: String,
    #[serde(alias = "mpdUrl")]
    pub track_location_url: String,
    #[serde(default, alias = "wideVineKeyResponse")]
    pub decryption_token: Option<String>,
}

/// The resolver stopped because the account has several profiles and none
/// was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePrompt {
    pub profiles: Vec<ProfileCandidate>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(EpisodeInfo),
    NeedsDecision(ProfilePrompt),
    Failed(String),
}

#[async_trait]
pub trait MetadataResolver: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_handle(&self, url: &str) -> u8;

    /// Never errors: transport problems come back as `Resolution::Failed`.
    async fn resolve(&self, session: &mut SessionLease, url: &str, profile: Option<&str>) -> Resolution;

    /// Episode URLs of a show. `season_count` limits how many seasons are
    /// walked; `None` means all of them.
    async fn list_show(
        &self,
        session: &mut SessionLease,
        url: &str,
        season_count: Option<u32>,
        reverse: bool,
    ) -> anyhow::Result<Vec<String>>;

    async fn list_season(&self, session: &mut SessionLease, url: &str, reverse: bool) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct ResolverCliConfig {
    pub base_url: Url,
    pub timeout: Option<Duration>,
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn augment_command(&self, cmd: Command) -> Command;
    fn apply_matches(&self, matches: &ArgMatches, cfg: &mut ResolverCliConfig) -> anyhow::Result<()>;
}

pub struct PluginRegistry {
    resolvers: Vec<Box<dyn MetadataResolver>>,
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self { resolvers: vec![], cli_plugins: vec![] }
    }

    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        reg.resolvers.push(Box::new(crate::plugins::http::resolver::HttpMetadataResolver::new()));
        reg.cli_plugins.push(Box::new(crate::plugins::http::cli::HttpCliPlugin::new()));
        reg
    }

    pub fn with_resolver(mut self, resolver: impl MetadataResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    pub fn augment_command(&self, cmd: Command) -> Command {
        self.cli_plugins.iter().fold(cmd, |c, p| p.augment_command(c))
    }

    pub fn apply_matches(&self, matches: &ArgMatches, cfg: &mut ResolverCliConfig) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            p.apply_matches(matches, cfg).with_context(|| format!("invalid {} plugin options", p.name()))?;
        }
        Ok(())
    }

    pub fn best_resolver(&self, url: &str) -> Option<&dyn MetadataResolver> {
        self.resolvers
            .iter()
            .map(|r| (r.can_handle(url), r.as_ref()))
            .max_by_key(|(c, _)| *c)
            .and_then(|(c, r)| if c == 0 { None } else { Some(r) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::fake::FakeResolver;

    #[test]
    fn episode_info_accepts_both_field_spellings() {
        let a: EpisodeInfo =
            serde_json::from_str(r#"{"filename":"ep","trackLocationUrl":"https://cdn/x.mpd","decryptionToken":"k:v"}"#)
                .unwrap();
        let b: EpisodeInfo =
            serde_json::from_str(r#"{"filename":"ep","mpdUrl":"https://cdn/x.mpd","wideVineKeyResponse":"k:v"}"#).unwrap();
        assert_eq!(a, b);

        let clear: EpisodeInfo = serde_json::from_str(r#"{"filename":"ep","trackLocationUrl":"u"}"#).unwrap();
        assert_eq!(clear.decryption_token, None);
    }

    #[test]
    fn best_resolver_skips_resolvers_that_decline() {
        let reg = PluginRegistry::empty().with_resolver(FakeResolver::default());
        assert_eq!(reg.best_resolver("https://www.example.test/a").map(|r| r.name()), Some("fake"));
        assert!(reg.best_resolver("magnet:?xt=abc").is_none());
        assert!(PluginRegistry::empty().best_resolver("https://www.example.test/a").is_none());
    }

    #[test]
    fn bad_plugin_options_name_the_plugin() {
        let reg = PluginRegistry::with_defaults();
        let m = reg
            .augment_command(Command::new("t"))
            .try_get_matches_from(["t", "--resolver-timeout-secs", "soon"])
            .unwrap();
        let mut cfg = ResolverCliConfig { base_url: Url::parse("http://unused/").unwrap(), timeout: None };
        let err = reg.apply_matches(&m, &mut cfg).unwrap_err();
        assert_eq!(err.to_string(), "invalid http plugin options");
    }
}

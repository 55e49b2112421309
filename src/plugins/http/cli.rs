use crate::plugins::registry::{CliPlugin, ResolverCliConfig};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;
use url::Url;

pub struct HttpCliPlugin;

impl HttpCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl CliPlugin for HttpCliPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    fn augment_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("resolver_url")
                .long("resolver-url")
                .env("RESOLVER_URL")
                .help_heading("Resolver")
                .help("Base URL of the metadata resolver service")
                .default_value("http://127.0.0.1:3002")
                .num_args(1),
        )
        .arg(
            Arg::new("resolver_timeout_secs")
                .long("resolver-timeout-secs")
                .env("RESOLVER_TIMEOUT_SECS")
                .help_heading("Resolver")
                .help("Per-request resolver timeout in seconds (0 disables)")
                .default_value("0")
                .num_args(1),
        )
    }

    fn apply_matches(&self, matches: &ArgMatches, cfg: &mut ResolverCliConfig) -> anyhow::Result<()> {
        if let Some(raw) = matches.get_one::<String>("resolver_url") {
            cfg.base_url = parse_base_url(raw)?;
        }
        if let Some(s) = matches.get_one::<String>("resolver_timeout_secs") {
            let secs: u64 = s.parse()?;
            cfg.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(())
    }
}

/// Endpoints are joined onto the base, so it must end with a slash.
fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use url::Url;

/// The single automation session the resolver service drives. Only one
/// resolver call can use it at a time.
#[derive(Debug)]
pub struct AutomationSession {
    client: reqwest::Client,
    base_url: Url,
    uses: u64,
}

impl AutomationSession {
    pub fn new(base_url: Url, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(concat!("media-fetch/", env!("CARGO_PKG_VERSION")));
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self { client: builder.build()?, base_url, uses: 0 })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }

    pub fn uses(&self) -> u64 {
        self.uses
    }

    pub(crate) fn record_use(&mut self) {
        self.uses += 1;
    }
}

/// Exclusive hold on the session; dropping it hands the session back.
pub type SessionLease = OwnedMutexGuard<AutomationSession>;

#[derive(Debug, Clone)]
pub struct SessionPool {
    inner: Arc<Mutex<AutomationSession>>,
}

impl SessionPool {
    pub fn new(session: AutomationSession) -> Self {
        Self { inner: Arc::new(Mutex::new(session)) }
    }

    pub async fn checkout(&self) -> SessionLease {
        self.inner.clone().lock_owned().await
    }
}

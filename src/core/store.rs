use crate::core::model::{Job, JobId, JobPatch, RequestKind};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory table of every known job.
///
/// Each record is written only by the engine task that owns it, so the lock
/// is never held across an await and never contended for long.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<BTreeMap<JobId, Job>>>,
    last_id: Arc<AtomicU64>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Millisecond creation time, bumped past the previous id when two jobs
    /// are created within the same millisecond.
    pub fn next_id(&self) -> JobId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut prev = self.last_id.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self.last_id.compare_exchange(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return next.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }

    pub async fn create(&self, id: &str, initial: Job) {
        let mut jobs = self.jobs.lock().await;
        jobs.insert(id.to_string(), initial);
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        let jobs = self.jobs.lock().await;
        jobs.get(id).cloned()
    }

    pub async fn set(&self, id: &str, patch: JobPatch) {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(id) {
            Some(job) => job.apply(patch),
            None => {
                jobs.insert(id.to_string(), patch.into_job(RequestKind::Episode));
            }
        }
    }

    pub async fn delete(&self, id: &str) {
        let mut jobs = self.jobs.lock().await;
        jobs.remove(id);
    }

    pub async fn list(&self) -> BTreeMap<JobId, Job> {
        let jobs = self.jobs.lock().await;
        jobs.clone()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Drops the record once `delay` has elapsed.
    pub fn schedule_eviction(&self, id: &str, delay: Duration) {
        let registry = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.delete(&id).await;
            debug!(job = %id, "evicted");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::JobStatus;

    #[test]
    fn ids_are_unique_and_increasing() {
        let reg = JobRegistry::new();
        let ids: Vec<u64> = (0..1000).map(|_| reg.next_id().parse().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn set_merges_into_existing_record() {
        let reg = JobRegistry::new();
        reg.create("1", Job::new(RequestKind::Show).with_url("https://example.test/show")).await;
        reg.set("1", JobPatch::status(JobStatus::Downloading)).await;

        let job = reg.get("1").await.unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.kind, RequestKind::Show);
        assert_eq!(job.url.as_deref(), Some("https://example.test/show"));
    }

    #[tokio::test]
    async fn set_inserts_unknown_ids() {
        let reg = JobRegistry::new();
        reg.set("9", JobPatch::status(JobStatus::FetchingInfo)).await;
        assert_eq!(reg.get("9").await.map(|j| j.status), Some(JobStatus::FetchingInfo));
    }

    #[tokio::test]
    async fn delete_and_list() {
        let reg = JobRegistry::new();
        reg.create("a", Job::new(RequestKind::Episode)).await;
        reg.create("b", Job::new(RequestKind::Batch)).await;
        reg.delete("a").await;

        let all = reg.list().await;
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("b"));
        assert!(reg.get("a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_waits_for_the_delay() {
        let reg = JobRegistry::new();
        reg.create("x", Job::new(RequestKind::Episode)).await;
        reg.schedule_eviction("x", Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(reg.get("x").await.is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(reg.get("x").await.is_none());
    }
}

use std::fmt;
use std::sync::Arc;

use tracing::{debug, Instrument};

use crate::config::DroverConfig;
use crate::details::{JobDetailsGenerator, JobDetailsStrategy};
use crate::error::SchedulerError;
use crate::job::{JobId, JobRecord, JobRequest, JobState};
use crate::policy::RetryPolicy;
use crate::storage::StorageProvider;
use crate::telemetry::{enqueue_span, record_job_enqueued};

/// Submission and state-query entry point for jobs.
///
/// Records are written through the shared [`StorageProvider`]; whatever
/// worker server reads the same storage picks them up.
pub struct JobScheduler {
    storage: Arc<dyn StorageProvider>,
    details: Box<dyn JobDetailsGenerator>,
    strategy: JobDetailsStrategy,
    retry_policy: RetryPolicy,
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("storage", &self.storage.name())
            .field("strategy", &self.strategy)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl JobScheduler {
    pub fn new(
        config: &DroverConfig,
        storage: Arc<dyn StorageProvider>,
    ) -> Result<Self, SchedulerError> {
        if !config.scheduler().enabled() {
            return Err(SchedulerError::Disabled);
        }
        let strategy = config.scheduler().job_details_strategy();
        Ok(Self {
            storage,
            details: strategy.build(),
            strategy,
            retry_policy: config.job_policy().retry_policy(),
        })
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    pub fn strategy(&self) -> JobDetailsStrategy {
        self.strategy
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    fn record_for(&self, request: JobRequest) -> JobRecord {
        let details = self.details.details(&request);
        JobRecord::enqueued(request, details, self.retry_policy.max_retries)
    }

    /// Persist an `Enqueued` record for `request`.
    pub async fn enqueue(&self, request: JobRequest) -> Result<JobId, SchedulerError> {
        let span = enqueue_span(&request.kind);
        async move {
            let record = self.record_for(request);
            self.storage.save(&record).await?;
            record_job_enqueued(record.id.to_string(), &record.kind);
            Ok(record.id)
        }
        .instrument(span)
        .await
    }

    /// Persist several requests in one storage call. Ids are returned in
    /// request order.
    pub async fn enqueue_all(
        &self,
        requests: impl IntoIterator<Item = JobRequest>,
    ) -> Result<Vec<JobId>, SchedulerError> {
        let records: Vec<JobRecord> = requests
            .into_iter()
            .map(|request| self.record_for(request))
            .collect();
        self.storage.save_all(&records).await?;
        debug!(count = records.len(), "jobs enqueued");
        Ok(records.iter().map(|r| r.id).collect())
    }

    pub async fn job(&self, id: JobId) -> Result<JobRecord, SchedulerError> {
        Ok(self.storage.get(id).await?)
    }

    pub async fn state_of(&self, id: JobId) -> Result<JobState, SchedulerError> {
        Ok(self.storage.get(id).await?.state)
    }
}
